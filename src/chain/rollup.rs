//! Destination rollup: `W_proj`, top source, chain flag and status.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::analysis::aggregator::SeriesPoint;
use crate::chain::{ChainEdge, LatestEdge, SeriesProjection};
use crate::config::{ChainConfig, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Stable,
    Rising,
    Sustained,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Stable => "stable",
            Status::Rising => "rising",
            Status::Sustained => "sustained",
        }
    }

    /// Parse a stored label; unknown labels read as stable.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "sustained" => Status::Sustained,
            "rising" => Status::Rising,
            _ => Status::Stable,
        }
    }

    pub fn classify(w: f64, w_proj: f64, cfg: &ChainConfig) -> Self {
        if w >= cfg.th_sus || w_proj >= cfg.th_sus {
            Status::Sustained
        } else if w_proj >= cfg.th_rise {
            Status::Rising
        } else {
            Status::Stable
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One incoming edge as seen by the rollup.
#[derive(Debug, Clone, PartialEq)]
pub struct Incoming {
    pub src: String,
    pub share: f64,
    pub base: f64,
    pub boosted: f64,
    pub delta: f64,
    pub level: Level,
}

impl From<&ChainEdge> for Incoming {
    fn from(e: &ChainEdge) -> Self {
        Self {
            src: e.src.clone(),
            share: e.corr,
            base: e.base_score,
            boosted: e.boosted_score,
            delta: e.delta_boost,
            level: e.max_event_level,
        }
    }
}

impl From<&LatestEdge> for Incoming {
    fn from(e: &LatestEdge) -> Self {
        Self {
            src: e.src.clone(),
            share: e.share,
            base: e.base_score,
            boosted: e.boosted_score,
            delta: e.delta_boost,
            level: e.max_event_level,
        }
    }
}

/// Project `dst` from its current point and incoming edges.
///
/// The top source is the edge with the largest boosted score, ties broken by
/// source name. Geo fields start neutral (`tw_rank_score == boosted_push`).
pub fn project_series(
    ts: &str,
    dst: &str,
    point: SeriesPoint,
    mut incoming: Vec<Incoming>,
    forcing: f64,
    cfg: &ChainConfig,
) -> SeriesProjection {
    incoming.sort_by(|a, b| {
        b.boosted
            .partial_cmp(&a.boosted)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.src.cmp(&b.src))
    });

    let base_push: f64 = incoming.iter().map(|e| e.base).sum();
    let boosted_push: f64 = incoming.iter().map(|e| e.boosted).sum();
    let delta_boost: f64 = incoming.iter().map(|e| e.delta).sum();

    let w = point.w;
    let w_proj = w + boosted_push + forcing;
    let uplift = w_proj - w;

    let top = incoming.first();
    let push = top.map_or(0.0, |e| e.boosted);
    let chain_flag = uplift >= cfg.min_uplift && push >= cfg.dominance * uplift;

    SeriesProjection {
        ts: ts.to_string(),
        series: dst.to_string(),
        w,
        w_proj,
        forcing,
        status: Status::classify(w, w_proj, cfg),
        chain_flag,
        top_src: top.map(|e| e.src.clone()),
        share: top.map_or(0.0, |e| e.share),
        push,
        push_raw: top.map_or(0.0, |e| e.base),
        base_push,
        boosted_push,
        delta_boost,
        domains: point.domains,
        l3_domains: point.l3_domains,
        max_event_level: top.map_or(Level::L1, |e| e.level),
        geo_factor: 0.0,
        tw_rank_score: boosted_push,
        geo_explain: serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inc(src: &str, base: f64, boosted: f64) -> Incoming {
        Incoming {
            src: src.to_string(),
            share: 0.9,
            base,
            boosted,
            delta: boosted - base,
            level: Level::L2,
        }
    }

    fn point(w: f64) -> SeriesPoint {
        SeriesPoint {
            w,
            domains: 2,
            l3_domains: 1,
        }
    }

    #[test]
    fn test_no_incoming_is_flat() {
        let p = project_series("t", "s", point(0.5), Vec::new(), 0.0, &ChainConfig::default());
        assert_eq!(p.w_proj, 0.5);
        assert!(!p.chain_flag);
        assert_eq!(p.top_src, None);
        assert_eq!(p.status, Status::Stable);
        assert_eq!(p.max_event_level, Level::L1);
    }

    #[test]
    fn test_dominant_source_sets_chain_flag() {
        let p = project_series(
            "t",
            "s",
            point(1.0),
            vec![inc("b", 0.05, 0.05), inc("a", 0.2, 0.3)],
            0.0,
            &ChainConfig::default(),
        );
        assert!((p.w_proj - 1.35).abs() < 1e-12);
        assert_eq!(p.top_src.as_deref(), Some("a"));
        assert_eq!(p.push, 0.3);
        assert_eq!(p.push_raw, 0.2);
        assert!(p.chain_flag);
        assert_eq!(p.status, Status::Rising);
        assert_eq!(p.tw_rank_score, p.boosted_push);
    }

    #[test]
    fn test_forcing_only_uplift_is_not_chain() {
        let p = project_series("t", "s", point(1.0), vec![inc("a", 0.01, 0.01)], 0.5, &ChainConfig::default());
        // uplift 0.51, top source carries 0.01 < 0.5 * 0.51
        assert!(!p.chain_flag);
        assert_eq!(p.forcing, 0.5);
    }

    #[test]
    fn test_ties_broken_by_source_name() {
        let p = project_series(
            "t",
            "s",
            point(0.0),
            vec![inc("zeta", 0.1, 0.1), inc("alpha", 0.1, 0.1)],
            0.0,
            &ChainConfig::default(),
        );
        assert_eq!(p.top_src.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_status_thresholds() {
        let cfg = ChainConfig::default();
        assert_eq!(Status::classify(1.9, 1.9, &cfg), Status::Sustained);
        assert_eq!(Status::classify(0.5, 1.85, &cfg), Status::Sustained);
        assert_eq!(Status::classify(0.5, 1.3, &cfg), Status::Rising);
        assert_eq!(Status::classify(0.5, 0.6, &cfg), Status::Stable);
    }
}
