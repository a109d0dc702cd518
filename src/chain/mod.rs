//! Cross-series pressure propagation.
//!
//! Edges are built per timestamp from lagged correlation and the source's
//! positive step, boosted by the source's event profile. Each destination is
//! then projected (`W_proj`) at that timestamp, and once more at the latest
//! timestamp from the time-decayed edge history.

pub mod edges;
pub mod geo;
pub mod latest;
pub mod rollup;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::analysis::aggregator::SeriesFrame;
use crate::config::{ChainConfig, Level};
use crate::events::{EventIndex, EventProfile, ForcingTable};

pub use self::rollup::Status;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("required upstream table {table} is missing or empty")]
    MissingUpstream { table: &'static str },
}

/// Directed push from `src` to `dst` at one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEdge {
    pub ts: String,
    pub src: String,
    pub dst: String,
    pub corr: f64,
    /// Source step `W[i] - W[i-1]`; always positive.
    pub delta_src: f64,
    pub boost_multiplier: f64,
    pub base_score: f64,
    pub boosted_score: f64,
    pub delta_boost: f64,
    pub src_event_date: Option<NaiveDate>,
    pub src_event_type: String,
    pub src_event_strength: f64,
    pub src_event_decayed_strength: f64,
    pub max_event_level: Level,
}

/// Time-decayed rollup of every edge between one `(src, dst)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestEdge {
    pub ts: String,
    pub src: String,
    pub dst: String,
    /// Undecayed mean correlation over the pair's edges.
    pub share: f64,
    pub base_score: f64,
    pub boosted_score: f64,
    pub delta_boost: f64,
    pub boost_multiplier: f64,
    pub edge_n: usize,
    pub src_event_date: Option<NaiveDate>,
    pub src_event_type: String,
    pub src_event_strength: f64,
    pub src_event_decayed_strength: f64,
    pub max_event_level: Level,
}

/// Projection of one series at one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesProjection {
    pub ts: String,
    pub series: String,
    #[serde(rename = "W")]
    pub w: f64,
    #[serde(rename = "W_proj")]
    pub w_proj: f64,
    pub forcing: f64,
    pub status: Status,
    pub chain_flag: bool,
    pub top_src: Option<String>,
    pub share: f64,
    /// Boosted score of the top incoming edge.
    pub push: f64,
    /// Base score of the top incoming edge.
    pub push_raw: f64,
    pub base_push: f64,
    pub boosted_push: f64,
    pub delta_boost: f64,
    pub domains: usize,
    pub l3_domains: usize,
    pub max_event_level: Level,
    pub geo_factor: f64,
    pub tw_rank_score: f64,
    pub geo_explain: serde_json::Value,
}

/// Everything the chain stage derives in one run.
#[derive(Debug, Clone, Default)]
pub struct ChainOutput {
    pub edges: Vec<ChainEdge>,
    pub latest_edges: Vec<LatestEdge>,
    pub projections: Vec<SeriesProjection>,
    pub latest_projections: Vec<SeriesProjection>,
}

/// Event profiles per series at one day.
pub(crate) fn profiles_at(
    frame: &SeriesFrame,
    events: &EventIndex,
    ts: &str,
    half_life_days: f64,
) -> Vec<EventProfile> {
    let day = ts
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
    frame
        .series
        .iter()
        .map(|s| match day {
            Some(day) => events.profile(s, day, half_life_days),
            None => EventProfile::default(),
        })
        .collect()
}

/// Build edges, per-timestamp projections and the latest decayed view.
pub fn build_chain(
    frame: &SeriesFrame,
    events: &EventIndex,
    forcing: &ForcingTable,
    cfg: &ChainConfig,
    half_life_days: f64,
) -> Result<ChainOutput, ChainError> {
    if frame.is_empty() {
        return Err(ChainError::MissingUpstream {
            table: "anomaly_records",
        });
    }

    let mut out = ChainOutput {
        edges: edges::build_edges(
            frame,
            |i| profiles_at(frame, events, &frame.timestamps[i], half_life_days),
            cfg,
        ),
        ..ChainOutput::default()
    };
    let mut incoming_by: BTreeMap<(&str, &str), Vec<rollup::Incoming>> = BTreeMap::new();
    for edge in &out.edges {
        incoming_by
            .entry((edge.ts.as_str(), edge.dst.as_str()))
            .or_default()
            .push(rollup::Incoming::from(edge));
    }

    let mut projections = Vec::with_capacity(frame.series.len() * frame.len().saturating_sub(1));
    for i in 1..frame.len() {
        let ts = &frame.timestamps[i];
        for dst in &frame.series {
            let incoming = incoming_by
                .remove(&(ts.as_str(), dst.as_str()))
                .unwrap_or_default();
            projections.push(rollup::project_series(
                ts,
                dst,
                frame.point(dst, i),
                incoming,
                forcing.get(ts, dst),
                cfg,
            ));
        }
    }
    out.projections = projections;

    let (latest_edges, latest_projections) =
        latest::build_latest(frame, &out.edges, events, forcing, cfg, half_life_days);
    out.latest_edges = latest_edges;
    out.latest_projections = latest_projections;

    let flagged = out.latest_projections.iter().filter(|p| p.chain_flag).count();
    info!(
        timestamps = frame.len(),
        series = frame.series.len(),
        edges = out.edges.len(),
        latest_edges = out.latest_edges.len(),
        flagged,
        "chain propagation complete"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::AnomalyRecord;

    fn frame_from(values: &[(&str, &[f64])]) -> SeriesFrame {
        let mut records = Vec::new();
        for (series, ws) in values {
            for (i, w) in ws.iter().enumerate() {
                records.push(AnomalyRecord {
                    ts: format!("2025-03-01T{:02}:00:00Z", i),
                    domain: format!("{}.ai", series),
                    series: series.to_string(),
                    series_raw: series.to_string(),
                    heat: 0.0,
                    a: 0.0,
                    d: 0.0,
                    hstar: 0.0,
                    w: *w,
                    level_max: Level::L1,
                    matched_signals: Vec::new(),
                });
            }
        }
        SeriesFrame::from_records(&records)
    }

    #[test]
    fn test_empty_frame_is_missing_upstream() {
        let err = build_chain(
            &SeriesFrame::default(),
            &EventIndex::default(),
            &ForcingTable::default(),
            &ChainConfig::default(),
            7.0,
        )
        .unwrap_err();
        assert!(matches!(err, ChainError::MissingUpstream { .. }));
    }

    #[test]
    fn test_edges_respect_invariants() {
        let frame = frame_from(&[
            ("x", &[1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 2.5]),
            ("y", &[0.0, 1.0, 2.0, 3.0, 4.0, 1.5, 2.0, 3.0]),
            ("z", &[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0]),
        ]);
        let out = build_chain(
            &frame,
            &EventIndex::default(),
            &ForcingTable::default(),
            &ChainConfig::default(),
            7.0,
        )
        .unwrap();
        assert!(!out.edges.is_empty());
        for e in &out.edges {
            assert!(e.delta_src > 0.0);
            assert!(e.corr > 0.0);
            assert!(e.boosted_score >= e.base_score);
            assert_ne!(e.src, e.dst);
        }
        // One projection per series per timestamp after the first.
        assert_eq!(out.projections.len(), 3 * 7);
        assert_eq!(out.latest_projections.len(), 3);
        assert!(out
            .latest_projections
            .iter()
            .all(|p| p.ts == "2025-03-01T07:00:00Z"));
    }

    #[test]
    fn test_projection_sums_only_its_own_incoming_edges() {
        let frame = frame_from(&[
            ("x", &[1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 2.5]),
            ("y", &[0.0, 1.0, 2.0, 3.0, 4.0, 1.5, 2.0, 3.0]),
            ("z", &[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0]),
        ]);
        let out = build_chain(
            &frame,
            &EventIndex::default(),
            &ForcingTable::default(),
            &ChainConfig::default(),
            7.0,
        )
        .unwrap();
        for p in &out.projections {
            let expected: f64 = out
                .edges
                .iter()
                .filter(|e| e.ts == p.ts && e.dst == p.series)
                .map(|e| e.boosted_score)
                .sum();
            assert!((p.boosted_push - expected).abs() < 1e-12);
            assert!((p.w_proj - (p.w + expected)).abs() < 1e-12);
        }
        // Projections stay in timestamp then series order.
        let keys: Vec<(&str, &str)> = out
            .projections
            .iter()
            .map(|p| (p.ts.as_str(), p.series.as_str()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
