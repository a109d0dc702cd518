//! Latest view: every historical edge decayed toward the latest timestamp.

use std::collections::BTreeMap;

use crate::analysis::aggregator::SeriesFrame;
use crate::chain::rollup::{project_series, Incoming};
use crate::chain::{profiles_at, ChainEdge, LatestEdge, SeriesProjection};
use crate::config::ChainConfig;
use crate::events::{EventIndex, EventProfile, ForcingTable};

const BASE_FLOOR: f64 = 1e-12;

/// `exp(-distance / tau)`.
pub fn decay_weight(distance: usize, tau: f64) -> f64 {
    (-(distance as f64) / tau).exp()
}

#[derive(Default)]
struct PairSums {
    base: f64,
    boosted: f64,
    delta: f64,
    corr: f64,
    n: usize,
}

/// Collapse edges into one decayed row per `(src, dst)`.
///
/// `latest_profile(series)` supplies a series' current event profile. The
/// source's replaces the per-timestamp one on the rollup row; the level is
/// the higher of source and destination.
pub fn decay_edges(
    frame: &SeriesFrame,
    edges: &[ChainEdge],
    tau: f64,
    latest_profile: impl Fn(&str) -> EventProfile,
) -> Vec<LatestEdge> {
    let Some(latest_ts) = frame.timestamps.last() else {
        return Vec::new();
    };
    let latest_idx = frame.len() - 1;
    let index: BTreeMap<&str, usize> = frame
        .timestamps
        .iter()
        .enumerate()
        .map(|(i, ts)| (ts.as_str(), i))
        .collect();

    let mut sums: BTreeMap<(&str, &str), PairSums> = BTreeMap::new();
    for edge in edges {
        let idx = index.get(edge.ts.as_str()).copied().unwrap_or(latest_idx);
        let w = decay_weight(latest_idx.saturating_sub(idx), tau);
        let s = sums.entry((edge.dst.as_str(), edge.src.as_str())).or_default();
        s.base += edge.base_score * w;
        s.boosted += edge.boosted_score * w;
        s.delta += edge.delta_boost * w;
        s.corr += edge.corr;
        s.n += 1;
    }

    sums.into_iter()
        .map(|((dst, src), s)| {
            let profile = latest_profile(src);
            let dst_level = latest_profile(dst).level;
            LatestEdge {
                ts: latest_ts.clone(),
                src: src.to_string(),
                dst: dst.to_string(),
                share: if s.n > 0 { s.corr / s.n as f64 } else { 0.0 },
                base_score: s.base,
                boosted_score: s.boosted,
                delta_boost: s.delta,
                boost_multiplier: if s.base > BASE_FLOOR {
                    s.boosted / s.base
                } else {
                    1.0
                },
                edge_n: s.n,
                src_event_date: profile.event_date,
                src_event_type: profile.event_type,
                src_event_strength: profile.strength,
                src_event_decayed_strength: profile.decayed_strength,
                max_event_level: profile.level.max(dst_level),
            }
        })
        .collect()
}

/// Decayed edges plus one projection per series at the latest timestamp.
pub fn build_latest(
    frame: &SeriesFrame,
    edges: &[ChainEdge],
    events: &EventIndex,
    forcing: &ForcingTable,
    cfg: &ChainConfig,
    half_life_days: f64,
) -> (Vec<LatestEdge>, Vec<SeriesProjection>) {
    let Some(latest_ts) = frame.timestamps.last() else {
        return (Vec::new(), Vec::new());
    };
    let latest_idx = frame.len() - 1;

    let profiles: BTreeMap<&str, EventProfile> = frame
        .series
        .iter()
        .map(String::as_str)
        .zip(profiles_at(frame, events, latest_ts, half_life_days))
        .collect();

    let latest_edges = decay_edges(frame, edges, cfg.tau, |src| {
        profiles.get(src).cloned().unwrap_or_default()
    });

    let projections = frame
        .series
        .iter()
        .map(|dst| {
            let incoming: Vec<Incoming> = latest_edges
                .iter()
                .filter(|e| &e.dst == dst)
                .map(Incoming::from)
                .collect();
            project_series(
                latest_ts,
                dst,
                frame.point(dst, latest_idx),
                incoming,
                forcing.get(latest_ts, dst),
                cfg,
            )
        })
        .collect();

    (latest_edges, projections)
}
