//! Edge construction at one timestamp index.

use crate::analysis::aggregator::SeriesFrame;
use crate::analysis::correlation::{lagged_windows, pearson};
use crate::chain::ChainEdge;
use crate::config::ChainConfig;
use crate::events::EventProfile;

/// Edges ending at timestamp index `i` (`i >= 1`).
///
/// `profiles` is parallel to `frame.series`. An edge needs a positive source
/// step, positive lagged correlation and a boosted score at or above the
/// noise floor.
pub fn edges_at(
    frame: &SeriesFrame,
    i: usize,
    profiles: &[EventProfile],
    cfg: &ChainConfig,
) -> Vec<ChainEdge> {
    let mut out = Vec::new();
    if i == 0 || i >= frame.len() {
        return out;
    }
    let ts = &frame.timestamps[i];
    let neutral = EventProfile::default();

    for (si, src) in frame.series.iter().enumerate() {
        let src_vals = frame.values(src);
        let delta_src = src_vals[i] - src_vals[i - 1];
        if delta_src <= 0.0 {
            continue;
        }
        let src_profile = profiles.get(si).unwrap_or(&neutral);

        for (di, dst) in frame.series.iter().enumerate() {
            if di == si {
                continue;
            }
            let (x, y) = lagged_windows(src_vals, frame.values(dst), i, cfg.window);
            let corr = pearson(x, y);
            if corr <= 0.0 {
                continue;
            }
            let base_score = corr * delta_src;
            let boosted_score = base_score * src_profile.boost;
            if boosted_score < cfg.edge_floor {
                continue;
            }
            let dst_level = profiles.get(di).map(|p| p.level).unwrap_or_default();
            out.push(ChainEdge {
                ts: ts.clone(),
                src: src.clone(),
                dst: dst.clone(),
                corr,
                delta_src,
                boost_multiplier: src_profile.boost,
                base_score,
                boosted_score,
                delta_boost: boosted_score - base_score,
                src_event_date: src_profile.event_date,
                src_event_type: src_profile.event_type.clone(),
                src_event_strength: src_profile.strength,
                src_event_decayed_strength: src_profile.decayed_strength,
                max_event_level: src_profile.level.max(dst_level),
            });
        }
    }
    out
}

/// All edges over the frame, in timestamp then `(src, dst)` order.
pub fn build_edges(
    frame: &SeriesFrame,
    profiles: impl Fn(usize) -> Vec<EventProfile>,
    cfg: &ChainConfig,
) -> Vec<ChainEdge> {
    (1..frame.len())
        .flat_map(|i| edges_at(frame, i, &profiles(i), cfg))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Level;
    use crate::detect::AnomalyRecord;
    use chrono::NaiveDate;

    fn frame(x: &[f64], y: &[f64]) -> SeriesFrame {
        let mut records = Vec::new();
        for (name, vals) in [("x", x), ("y", y)] {
            for (i, w) in vals.iter().enumerate() {
                records.push(AnomalyRecord {
                    ts: format!("2025-03-01T{:02}:00:00Z", i),
                    domain: format!("{}.ai", name),
                    series: name.to_string(),
                    series_raw: name.to_string(),
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
    fn test_positive_step_with_correlated_destination() {
        // x steps 1.0 -> 2.0 at the last index; y's lagged window tracks x.
        let f = frame(&[1.0, 2.0, 3.0, 4.0, 1.0, 2.0], &[0.0, 1.0, 2.0, 3.0, 4.0, 1.5]);
        let cfg = ChainConfig::default();
        let edges = edges_at(&f, 5, &[EventProfile::default(), EventProfile::default()], &cfg);
        let e = edges.iter().find(|e| e.src == "x" && e.dst == "y").unwrap();

        let (xw, yw) = lagged_windows(f.values("x"), f.values("y"), 5, cfg.window);
        let corr = pearson(xw, yw);
        assert!(corr > 0.0);
        assert_eq!(e.delta_src, 1.0);
        assert!((e.base_score - corr * 1.0).abs() < 1e-12);
        assert!(e.boosted_score >= e.base_score);
        assert_eq!(e.delta_boost, 0.0);
    }

    #[test]
    fn test_no_edge_without_positive_step() {
        let f = frame(&[1.0, 2.0, 3.0, 4.0, 5.0, 4.0], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let edges = edges_at(&f, 5, &[], &ChainConfig::default());
        assert!(edges.iter().all(|e| e.src != "x"));
    }

    #[test]
    fn test_event_boost_applies_to_source() {
        let f = frame(&[1.0, 2.0, 3.0, 4.0, 1.0, 2.0], &[0.0, 1.0, 2.0, 3.0, 4.0, 1.5]);
        let hot = EventProfile {
            event_date: NaiveDate::from_ymd_opt(2025, 3, 1),
            event_type: "spike".to_string(),
            strength: 4.0,
            decayed_strength: 4.0,
            boost: crate::events::event_boost(4.0),
            level: Level::L3,
        };
        let edges = edges_at(&f, 5, &[hot.clone(), EventProfile::default()], &ChainConfig::default());
        let e = edges.iter().find(|e| e.src == "x").unwrap();
        assert!((e.boosted_score - e.base_score * hot.boost).abs() < 1e-12);
        assert!(e.delta_boost > 0.0);
        assert_eq!(e.max_event_level, Level::L3);
    }

    #[test]
    fn test_noise_floor_drops_tiny_edges() {
        let f = frame(&[1.0, 2.0, 3.0, 4.0, 1.0, 2.0], &[0.0, 1.0, 2.0, 3.0, 4.0, 1.5]);
        let cfg = ChainConfig {
            edge_floor: 1e9,
            ..ChainConfig::default()
        };
        assert!(edges_at(&f, 5, &[], &cfg).is_empty());
        assert!(build_edges(&f, |_| Vec::new(), &cfg).is_empty());
    }
}
