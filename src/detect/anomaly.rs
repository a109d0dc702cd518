//! Anomaly records: A, D, Hstar and the decayed pressure W per entity.
//!
//! The baseline for `A` is the median heat of the entity over the whole input,
//! including timestamps after the one being scored. This lookahead is kept on
//! purpose so scores stay comparable with earlier runs.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{info, warn};

use crate::analysis::stats::TimeSeries;
use crate::config::{Level, ScoringParams, SignalDictionary};
use crate::detect::heat::{score_heat, HeatScore};
use crate::detect::{AnomalyRecord, DetectError};
use crate::ingest::Snapshot;

const EPS: f64 = 1e-6;

/// Score every `(ts, domain)` in `snapshots`. Output is ordered by `(ts, domain)`.
///
/// A repeated `(ts, domain)` keeps the last row seen; the baseline median still
/// counts every row.
pub fn score_snapshots(
    snapshots: &[Snapshot],
    dict: &SignalDictionary,
    params: &ScoringParams,
) -> Result<Vec<AnomalyRecord>, DetectError> {
    if snapshots.is_empty() {
        return Err(DetectError::EmptySnapshots);
    }

    let heats: Vec<HeatScore> = snapshots.iter().map(|snap| score_heat(snap, dict)).collect();

    // Baseline per entity over every input row, duplicates included.
    let mut heat_by_domain: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (snap, h) in snapshots.iter().zip(&heats) {
        heat_by_domain.entry(snap.domain.as_str()).or_default().push(h.heat);
    }
    let baseline: BTreeMap<&str, f64> = heat_by_domain
        .iter()
        .map(|(d, v)| (*d, TimeSeries::new(v).median()))
        .collect();

    let mut rows: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    let mut duplicates = 0usize;
    for (idx, snap) in snapshots.iter().enumerate() {
        if rows.insert((snap.ts.as_str(), snap.domain.as_str()), idx).is_some() {
            duplicates += 1;
        }
    }
    if duplicates > 0 {
        warn!(duplicates, "duplicate (ts, domain) snapshot rows, keeping the last");
    }

    let scored: Vec<(&Snapshot, &HeatScore)> = rows
        .values()
        .map(|&idx| (&snapshots[idx], &heats[idx]))
        .collect();

    // Diffusion per timestamp.
    let mut active: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut top: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (snap, h) in &scored {
        active.entry(snap.ts.as_str()).or_default().insert(snap.domain.as_str());
        if h.level.is_top() {
            top.entry(snap.ts.as_str()).or_default().insert(snap.domain.as_str());
        }
    }

    let mut records: Vec<AnomalyRecord> = scored
        .iter()
        .map(|(snap, h)| {
            let base = baseline.get(snap.domain.as_str()).copied().unwrap_or(0.0);
            let a = ((h.heat + EPS) / (base + EPS)).ln();
            let n_active = active.get(snap.ts.as_str()).map_or(0, |s| s.len());
            let n_top = top.get(snap.ts.as_str()).map_or(0, |s| s.len());
            let d = if n_active == 0 { 0.0 } else { n_top as f64 / n_active as f64 };
            let hstar = h.heat * (1.0 + params.alpha * a.max(0.0)) * (1.0 + params.beta * d);
            AnomalyRecord {
                ts: snap.ts.clone(),
                domain: snap.domain.clone(),
                series: snap.series.clone(),
                series_raw: snap.series_raw.clone(),
                heat: h.heat,
                a,
                d,
                hstar,
                w: 0.0,
                level_max: h.level,
                matched_signals: h.matched.clone(),
            }
        })
        .collect();

    // W per entity over its own timestamp order. Records are already sorted
    // by (ts, domain), so per-domain index lists come out in ts order.
    let mut by_domain: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, rec) in records.iter().enumerate() {
        by_domain.entry(rec.domain.clone()).or_default().push(idx);
    }
    for indices in by_domain.values() {
        let hstars: Vec<f64> = indices.iter().map(|&i| records[i].hstar).collect();
        for (pos, w) in decayed_pressure(&hstars, params.window, params.decay)
            .into_iter()
            .enumerate()
        {
            records[indices[pos]].w = w;
        }
    }

    let top_level = records.iter().filter(|r| r.level_max == Level::L3).count();
    info!(
        records = records.len(),
        entities = by_domain.len(),
        timestamps = active.len(),
        top_level,
        "anomaly scoring complete"
    );
    Ok(records)
}

/// Normalised geometric-decay sum of the trailing `window` values, clamped at
/// zero and `log1p`-compressed.
pub fn decayed_pressure(hstar: &[f64], window: usize, decay: f64) -> Vec<f64> {
    (0..hstar.len())
        .map(|i| {
            let mut num = 0.0;
            let mut den = 0.0;
            let mut weight = 1.0;
            for j in 0..window.min(i + 1) {
                num += hstar[i - j] * weight;
                den += weight;
                weight *= decay;
            }
            (num / den.max(EPS)).max(0.0).ln_1p()
        })
        .collect()
}
