//! Trend persistence: EWMA momentum of per-tag share deltas and the
//! none / watch / eligible classification.

pub mod artifact;
pub mod kernel;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::stats::{sign_eps, TimeSeries};
use crate::chain::SeriesProjection;
use crate::config::PersistenceConfig;

pub use self::artifact::load_delta_artifact;
pub use self::kernel::{compute_event_kernel, EventKernel};

const SUM_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ers {
    None,
    Watch,
    Eligible,
}

impl Ers {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ers::None => "none",
            Ers::Watch => "watch",
            Ers::Eligible => "eligible",
        }
    }
}

/// Direction label: `+`, `-` or `0`.
pub fn direction(sign: i8) -> &'static str {
    match sign {
        1 => "+",
        -1 => "-",
        _ => "0",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagState {
    pub tag: String,
    /// Latest raw delta.
    pub delta: f64,
    /// Latest EWMA momentum.
    pub m: f64,
    pub c: f64,
    pub p: f64,
    pub dir: String,
    pub streak: usize,
    pub ers: Ers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceReport {
    pub version: String,
    pub window: usize,
    pub latest_ts: String,
    pub tags: Vec<TagState>,
}

/// Per-tag `(ts, delta)` series, ordered by timestamp.
pub type DeltaSeries = BTreeMap<String, Vec<(String, f64)>>;

/// For each timestamp, each tag's share of `tw_rank_score` minus its share of
/// `boosted_push`. Sums at or below 1e-12 give a zero share.
pub fn build_delta_series(projections: &[SeriesProjection]) -> DeltaSeries {
    let mut by_ts: BTreeMap<&str, BTreeMap<&str, (f64, f64)>> = BTreeMap::new();
    let mut tags: BTreeSet<&str> = BTreeSet::new();
    for p in projections {
        tags.insert(p.series.as_str());
        by_ts
            .entry(p.ts.as_str())
            .or_default()
            .insert(p.series.as_str(), (p.tw_rank_score, p.boosted_push));
    }

    let mut out: DeltaSeries = tags.iter().map(|t| (t.to_string(), Vec::new())).collect();
    for (ts, row) in &by_ts {
        let sum_geo: f64 = row.values().map(|v| v.0).sum();
        let sum_base: f64 = row.values().map(|v| v.1).sum();
        for tag in &tags {
            let (geo, base) = row.get(tag).copied().unwrap_or((0.0, 0.0));
            let geo_norm = if sum_geo > SUM_FLOOR { geo / sum_geo } else { 0.0 };
            let base_norm = if sum_base > SUM_FLOOR { base / sum_base } else { 0.0 };
            if let Some(series) = out.get_mut(*tag) {
                series.push((ts.to_string(), geo_norm - base_norm));
            }
        }
    }
    out
}

pub fn classify(p: f64, streak: usize, cfg: &PersistenceConfig) -> Ers {
    let th = &cfg.ers_thresholds;
    if p >= th.eligible_p && streak >= th.eligible_streak {
        Ers::Eligible
    } else if p >= th.watch_p && streak >= th.watch_streak {
        Ers::Watch
    } else {
        Ers::None
    }
}

/// State of one tag from its delta values (oldest first).
pub fn tag_state(tag: &str, deltas: &[f64], cfg: &PersistenceConfig) -> Option<TagState> {
    let latest_delta = *deltas.last()?;
    let momentum = TimeSeries::new(deltas).ewma(cfg.alpha);
    let m = momentum.last().copied().unwrap_or(0.0);
    let m_sign = sign_eps(m, cfg.eps);

    let window = &deltas[deltas.len().saturating_sub(cfg.window)..];
    let mut same = 0usize;
    let mut nonzero = 0usize;
    for &d in window {
        let s = sign_eps(d, cfg.eps);
        if s != 0 {
            nonzero += 1;
        }
        if m_sign != 0 && s == m_sign {
            same += 1;
        }
    }
    let c = same as f64 / nonzero.max(1) as f64;
    let p = (m.abs() / (m.abs() + cfg.eps)).clamp(0.0, 1.0) * c;

    let streak = if m_sign == 0 {
        0
    } else {
        deltas
            .iter()
            .rev()
            .take_while(|&&d| sign_eps(d, cfg.eps) == m_sign)
            .count()
    };

    Some(TagState {
        tag: tag.to_string(),
        delta: latest_delta,
        m,
        c,
        p,
        dir: direction(m_sign).to_string(),
        streak,
        ers: classify(p, streak, cfg),
    })
}

/// Classify every tag. Output is ordered by `p` desc, `|delta|` desc, tag.
pub fn compute_tag_persistence(series: &DeltaSeries, cfg: &PersistenceConfig) -> PersistenceReport {
    let mut latest_ts = String::new();
    let mut tags = Vec::new();
    for (tag, points) in series {
        if let Some((ts, _)) = points.last() {
            if *ts > latest_ts {
                latest_ts = ts.clone();
            }
        }
        let deltas: Vec<f64> = points.iter().map(|(_, d)| *d).collect();
        if let Some(state) = tag_state(tag, &deltas, cfg) {
            tags.push(state);
        }
    }
    tags.sort_by(|a, b| {
        b.p.total_cmp(&a.p)
            .then_with(|| b.delta.abs().total_cmp(&a.delta.abs()))
            .then_with(|| a.tag.cmp(&b.tag))
    });

    let eligible = tags.iter().filter(|t| t.ers == Ers::Eligible).count();
    let watch = tags.iter().filter(|t| t.ers == Ers::Watch).count();
    info!(tags = tags.len(), eligible, watch, %latest_ts, "persistence classified");

    PersistenceReport {
        version: cfg.version.clone(),
        window: cfg.window,
        latest_ts,
        tags,
    }
}
