//! Event strength and spike-event derivation from daily volume.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::config::Level;
use crate::detect::AnomalyRecord;
use crate::events::Event;
use crate::ingest::Snapshot;

/// Prior days averaged into the spike baseline.
pub const BASELINE_DAYS: usize = 3;
/// Minimum `(current - baseline) / max(baseline, 1)` for a spike.
pub const SPIKE_RATIO: f64 = 1.0;
/// Minimum latest-day volume for a spike.
pub const MIN_VOLUME: f64 = 10.0;

/// Strength in `[0, 10]` from baseline vs current volume and the edge/origin split.
///
/// Doubling the baseline is worth about 3.6 points; a higher edge share
/// lowers the score slightly, a higher origin share raises it.
pub fn event_strength(baseline_avg: f64, current: f64, origin_served: f64, edge_served: f64) -> f64 {
    let b = baseline_avg.max(1.0);
    let c = current.max(0.0);
    let delta = (c - b).max(0.0);

    let s_ratio = (c / b).log2().max(0.0);
    let s_delta = (delta / b).ln_1p();

    let total = (origin_served + edge_served).max(1.0);
    let edge_share = edge_served / total;
    let s_src = (0.5 - edge_share) * 0.6;

    let raw = 2.2 * s_ratio + 2.0 * s_delta + s_src;
    (raw * 2.0).clamp(0.0, 10.0)
}

#[derive(Debug, Default, Clone, Copy)]
struct DayTotals {
    requests: f64,
    origin: f64,
    edge: f64,
}

/// Compare each entity's latest day with the mean of up to [`BASELINE_DAYS`]
/// prior days and emit a `spike` event when the jump is large enough.
///
/// Entities need more than [`BASELINE_DAYS`] days of history. The event level is
/// the entity's highest anomaly level on the spike day.
pub fn derive_spike_events(snapshots: &[Snapshot], records: &[AnomalyRecord]) -> Vec<Event> {
    let mut daily: BTreeMap<&str, BTreeMap<NaiveDate, DayTotals>> = BTreeMap::new();
    let mut series_on_day: BTreeMap<(&str, NaiveDate), &str> = BTreeMap::new();
    for snap in snapshots {
        let Some(day) = snap
            .ts
            .get(..10)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };
        let totals = daily
            .entry(snap.domain.as_str())
            .or_default()
            .entry(day)
            .or_default();
        totals.requests += snap.requests as f64;
        totals.origin += snap.origin_served as f64;
        totals.edge += snap.edge_served as f64;
        series_on_day.insert((snap.domain.as_str(), day), snap.series.as_str());
    }

    let mut level_on_day: BTreeMap<(&str, &str), Level> = BTreeMap::new();
    for rec in records {
        let Some(day) = rec.ts.get(..10) else { continue };
        let entry = level_on_day
            .entry((rec.domain.as_str(), day))
            .or_insert(Level::L1);
        *entry = (*entry).max(rec.level_max);
    }

    let mut events = Vec::new();
    for (domain, days) in &daily {
        if days.len() <= BASELINE_DAYS {
            continue;
        }
        let ordered: Vec<(&NaiveDate, &DayTotals)> = days.iter().collect();
        let Some((&latest_day, latest)) = ordered.last().copied() else {
            continue;
        };
        let prior = &ordered[ordered.len().saturating_sub(BASELINE_DAYS + 1)..ordered.len() - 1];
        let baseline_avg = prior.iter().map(|(_, t)| t.requests).sum::<f64>() / prior.len().max(1) as f64;
        let ratio = (latest.requests - baseline_avg) / baseline_avg.max(1.0);

        if ratio < SPIKE_RATIO || latest.requests < MIN_VOLUME {
            continue;
        }

        let date_key = latest_day.format("%Y-%m-%d").to_string();
        let level = level_on_day
            .get(&(*domain, date_key.as_str()))
            .copied()
            .unwrap_or_default();
        let series = series_on_day
            .get(&(*domain, latest_day))
            .copied()
            .unwrap_or("unmapped");
        let strength = event_strength(baseline_avg, latest.requests, latest.origin, latest.edge);
        debug!(domain, %latest_day, ratio, strength, "spike event derived");
        events.push(Event {
            date: latest_day,
            domain: domain.to_string(),
            series: series.to_string(),
            event_type: "spike".to_string(),
            strength,
            level,
            matched_signals: Vec::new(),
        });
    }

    info!(
        entities = daily.len(),
        events = events.len(),
        "spike events derived from daily volume"
    );
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeriesRegistry;
    use crate::ingest::normalize_row;

    fn snap(date: &str, domain: &str, req: u64, edge: u64) -> Snapshot {
        let row = serde_json::json!({
            "date": date, "domain": domain, "series": "s",
            "request_count": req, "edge_served": edge
        });
        normalize_row(row.as_object().unwrap(), &SeriesRegistry::default())
    }

    #[test]
    fn test_strength_bounds() {
        assert_eq!(event_strength(100.0, 50.0, 50.0, 0.0), 0.6);
        assert_eq!(event_strength(1.0, 1e9, 1e9, 0.0), 10.0);
        // No change, all edge-served: clamps at zero.
        assert_eq!(event_strength(100.0, 100.0, 0.0, 100.0), 0.0);
    }

    #[test]
    fn test_doubling_strength() {
        // log2(2)=1, ln1p(1)=ln2, even split -> no source term.
        let s = event_strength(100.0, 200.0, 100.0, 100.0);
        let expected = 2.0 * (2.2 + 2.0 * std::f64::consts::LN_2);
        assert!((s - expected).abs() < 1e-12);
    }

    #[test]
    fn test_spike_needs_history_and_jump() {
        let mut snaps = vec![
            snap("2025-03-01", "a.ai", 10, 0),
            snap("2025-03-02", "a.ai", 10, 0),
            snap("2025-03-03", "a.ai", 10, 0),
            snap("2025-03-04", "a.ai", 40, 20),
            // Flat entity: no event.
            snap("2025-03-01", "b.ai", 10, 0),
            snap("2025-03-02", "b.ai", 10, 0),
            snap("2025-03-03", "b.ai", 10, 0),
            snap("2025-03-04", "b.ai", 12, 0),
            // Too little history.
            snap("2025-03-03", "c.ai", 1, 0),
            snap("2025-03-04", "c.ai", 500, 0),
        ];
        let events = derive_spike_events(&snaps, &[]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].domain, "a.ai");
        assert_eq!(events[0].level, Level::L1);
        assert!(events[0].strength > 0.0);

        // Small volumes never count as spikes.
        snaps.retain(|s| s.domain == "a.ai");
        for s in snaps.iter_mut() {
            s.requests /= 10;
        }
        assert!(derive_spike_events(&snaps, &[]).is_empty());
    }
}
