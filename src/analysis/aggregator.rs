//! Per-series scalar series built from entity anomaly records.

use std::collections::{BTreeMap, BTreeSet};

use crate::detect::AnomalyRecord;

/// Aggregate of one series at one timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeriesPoint {
    /// Mean entity `W`, taking the largest mean when several raw labels fold
    /// into the same series.
    pub w: f64,
    pub domains: usize,
    pub l3_domains: usize,
}

/// Dense `timestamps x series` grid. Missing cells are zero.
#[derive(Debug, Clone, Default)]
pub struct SeriesFrame {
    pub timestamps: Vec<String>,
    pub series: Vec<String>,
    points: BTreeMap<String, Vec<SeriesPoint>>,
    w: BTreeMap<String, Vec<f64>>,
}

#[derive(Default)]
struct RawBucket<'a> {
    w_sum: f64,
    count: usize,
    domains: BTreeSet<&'a str>,
    l3: BTreeSet<&'a str>,
}

impl SeriesFrame {
    pub fn from_records(records: &[AnomalyRecord]) -> Self {
        // (ts, series, series_raw) -> bucket
        let mut raw: BTreeMap<(&str, &str, &str), RawBucket> = BTreeMap::new();
        let mut timestamps = BTreeSet::new();
        let mut series = BTreeSet::new();
        for rec in records {
            timestamps.insert(rec.ts.as_str());
            series.insert(rec.series.as_str());
            let bucket = raw
                .entry((rec.ts.as_str(), rec.series.as_str(), rec.series_raw.as_str()))
                .or_default();
            bucket.w_sum += rec.w;
            bucket.count += 1;
            bucket.domains.insert(rec.domain.as_str());
            if rec.level_max.is_top() {
                bucket.l3.insert(rec.domain.as_str());
            }
        }

        let timestamps: Vec<String> = timestamps.into_iter().map(str::to_string).collect();
        let series: Vec<String> = series.into_iter().map(str::to_string).collect();
        let ts_index: BTreeMap<&str, usize> = timestamps
            .iter()
            .enumerate()
            .map(|(i, ts)| (ts.as_str(), i))
            .collect();

        let mut points: BTreeMap<String, Vec<SeriesPoint>> = series
            .iter()
            .map(|s| (s.clone(), vec![SeriesPoint::default(); timestamps.len()]))
            .collect();

        for ((ts, name, _raw), bucket) in &raw {
            let (Some(&i), Some(column)) = (ts_index.get(ts), points.get_mut(*name)) else {
                continue;
            };
            let avg = bucket.w_sum / bucket.count.max(1) as f64;
            let point = &mut column[i];
            point.w = point.w.max(avg);
            point.domains += bucket.domains.len();
            point.l3_domains += bucket.l3.len();
        }

        let w = points
            .iter()
            .map(|(s, col)| (s.clone(), col.iter().map(|p| p.w).collect()))
            .collect();

        Self {
            timestamps,
            series,
            points,
            w,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty() || self.series.is_empty()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// `W` column of a series; empty for unknown series.
    pub fn values(&self, series: &str) -> &[f64] {
        self.w.get(series).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn point(&self, series: &str, idx: usize) -> SeriesPoint {
        self.points
            .get(series)
            .and_then(|col| col.get(idx))
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Level;

    fn rec(ts: &str, domain: &str, series: &str, raw: &str, w: f64, level: Level) -> AnomalyRecord {
        AnomalyRecord {
            ts: ts.to_string(),
            domain: domain.to_string(),
            series: series.to_string(),
            series_raw: raw.to_string(),
            heat: 0.0,
            a: 0.0,
            d: 0.0,
            hstar: 0.0,
            w,
            level_max: level,
            matched_signals: Vec::new(),
        }
    }

    #[test]
    fn test_mean_per_raw_label_then_max() {
        let records = vec![
            rec("t1", "a", "gov", "Gov", 1.0, Level::L1),
            rec("t1", "b", "gov", "Gov", 3.0, Level::L3),
            rec("t1", "c", "gov", "governance", 2.5, Level::L2),
            rec("t2", "d", "fin", "fin", 4.0, Level::L1),
        ];
        let frame = SeriesFrame::from_records(&records);
        assert_eq!(frame.timestamps, vec!["t1", "t2"]);
        assert_eq!(frame.series, vec!["fin", "gov"]);

        let p = frame.point("gov", 0);
        assert_eq!(p.w, 2.5);
        assert_eq!(p.domains, 3);
        assert_eq!(p.l3_domains, 1);

        assert_eq!(frame.values("gov"), &[2.5, 0.0]);
        assert_eq!(frame.values("fin"), &[0.0, 4.0]);
        assert!(frame.values("nope").is_empty());
    }

    #[test]
    fn test_empty_frame() {
        let frame = SeriesFrame::from_records(&[]);
        assert!(frame.is_empty());
        assert_eq!(frame.point("x", 0), SeriesPoint::default());
    }
}
