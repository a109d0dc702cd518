//! Snapshot ingestion: line-delimited JSON rows normalised into `Snapshot`s.
//!
//! Rows are never rejected for missing or mistyped fields. Defaults are filled
//! in and the row carries `missing_fields` / `malformed_fields` annotations;
//! keys we do not know are listed in `extra_fields`.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::SeriesRegistry;

pub const SNAPSHOT_SCHEMA_VERSION: &str = "snapshot_v1";
pub const EPOCH_TS: &str = "1970-01-01T00:00:00Z";
/// Width of a snapshot slot in seconds.
pub const SLOT_SECONDS: i64 = 30 * 60;

const KNOWN_KEYS: &[&str] = &[
    "ts",
    "timestamp",
    "date",
    "domain",
    "series",
    "series_raw",
    "request_count",
    "req",
    "requests",
    "dns_total",
    "mitigated",
    "edge_served",
    "cf_served",
    "origin_served",
    "top_countries",
    "signal_hint",
    "sig",
    "notes",
];

/// One normalised traffic observation for an entity at a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Canonical RFC 3339 UTC timestamp (`YYYY-MM-DDTHH:MM:SSZ`).
    pub ts: String,
    pub slot: i64,
    pub domain: String,
    pub series: String,
    pub series_raw: String,
    pub requests: u64,
    pub mitigated: u64,
    pub edge_served: u64,
    pub origin_served: u64,
    pub top_countries: BTreeMap<String, f64>,
    pub signal_hint: String,
    pub notes: String,
    pub missing_fields: Vec<String>,
    pub malformed_fields: Vec<String>,
    pub extra_fields: Vec<String>,
}

impl Snapshot {
    /// Hour bucket key (`YYYY-MM-DDTHH`) used by the event forcing store.
    pub fn hour_key(&self) -> &str {
        hour_key(&self.ts)
    }

    pub fn is_annotated(&self) -> bool {
        !self.missing_fields.is_empty() || !self.malformed_fields.is_empty()
    }
}

pub fn hour_key(ts: &str) -> &str {
    ts.get(..13).unwrap_or(ts)
}

/// Parse RFC 3339, naive `YYYY-MM-DDTHH:MM:SS` (taken as UTC) or a bare date.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn canonical_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

struct RowReader<'a> {
    row: &'a Map<String, Value>,
    missing: Vec<String>,
    malformed: Vec<String>,
}

impl<'a> RowReader<'a> {
    fn new(row: &'a Map<String, Value>) -> Self {
        Self {
            row,
            missing: Vec::new(),
            malformed: Vec::new(),
        }
    }

    /// First non-null value among `keys`.
    fn pick(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|k| self.row.get(*k))
            .find(|v| !v.is_null())
    }

    fn text(&mut self, field: &str, keys: &[&str], default: &str) -> String {
        match self.pick(keys) {
            None => {
                self.missing.push(field.to_string());
                default.to_string()
            }
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::String(_)) => default.to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => {
                self.malformed.push(field.to_string());
                default.to_string()
            }
        }
    }

    fn count(&mut self, field: &str, keys: &[&str]) -> Option<u64> {
        match self.pick(keys) {
            None => {
                self.missing.push(field.to_string());
                None
            }
            Some(v) => match as_count(v) {
                Some(n) => Some(n),
                None => {
                    self.malformed.push(field.to_string());
                    None
                }
            },
        }
    }
}

fn as_count(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// Normalise one raw JSON object.
pub fn normalize_row(row: &Map<String, Value>, registry: &SeriesRegistry) -> Snapshot {
    let mut r = RowReader::new(row);

    let ts_raw = match r.pick(&["ts", "timestamp"]) {
        Some(v) => Some((v, false)),
        None => r.pick(&["date"]).map(|v| (v, true)),
    };
    let ts = match ts_raw {
        None => {
            r.missing.push("ts".to_string());
            EPOCH_TS.to_string()
        }
        Some((Value::String(s), _)) => match parse_timestamp(s) {
            Some(dt) => canonical_ts(&dt),
            None => {
                r.malformed.push("ts".to_string());
                EPOCH_TS.to_string()
            }
        },
        Some(_) => {
            r.malformed.push("ts".to_string());
            EPOCH_TS.to_string()
        }
    };
    let slot = parse_timestamp(&ts)
        .map(|dt| dt.timestamp().div_euclid(SLOT_SECONDS))
        .unwrap_or(0);

    let domain = r.text("domain", &["domain"], "unknown.domain").to_lowercase();
    let series_raw = r.text("series", &["series", "series_raw"], "");
    let series = registry.resolve(&series_raw, &domain);

    let requests = r
        .count("request_count", &["request_count", "req", "requests", "dns_total"])
        .unwrap_or(0);
    let edge_served = r.count("edge_served", &["edge_served", "cf_served"]).unwrap_or(0);
    let origin_served = r
        .count("origin_served", &["origin_served"])
        .unwrap_or_else(|| requests.saturating_sub(edge_served));
    let mitigated = r.count("mitigated", &["mitigated"]).unwrap_or(0);

    let top_countries = match r.pick(&["top_countries"]) {
        None => {
            r.missing.push("top_countries".to_string());
            BTreeMap::new()
        }
        Some(Value::Object(map)) => country_counts(map),
        Some(_) => {
            r.malformed.push("top_countries".to_string());
            BTreeMap::new()
        }
    };

    let signal_hint = r.text("signal_hint", &["signal_hint", "sig"], "other");
    let notes = r.text("notes", &["notes"], "");

    let mut extra_fields: Vec<String> = row
        .keys()
        .filter(|k| !KNOWN_KEYS.contains(&k.as_str()))
        .cloned()
        .collect();
    extra_fields.sort();

    let RowReader {
        mut missing,
        mut malformed,
        ..
    } = r;
    missing.sort();
    missing.dedup();
    malformed.sort();
    malformed.dedup();

    Snapshot {
        ts,
        slot,
        domain,
        series,
        series_raw,
        requests,
        mitigated,
        edge_served,
        origin_served,
        top_countries,
        signal_hint,
        notes,
        missing_fields: missing,
        malformed_fields: malformed,
        extra_fields,
    }
}

/// Upper-cased country code to non-negative count; duplicates after
/// normalisation are summed, non-numeric counts are ignored.
fn country_counts(map: &Map<String, Value>) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for (country, value) in map {
        let code = country.trim().to_uppercase();
        if code.is_empty() {
            continue;
        }
        let count = match value {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        };
        if count.is_finite() && count > 0.0 {
            *out.entry(code).or_insert(0.0) += count;
        }
    }
    out
}

/// Read and normalise a snapshot JSONL file. Lines that are not JSON objects
/// are skipped with a warning; everything else becomes a row.
pub fn read_jsonl(path: &Path, registry: &SeriesRegistry) -> Result<Vec<Snapshot>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open snapshot input: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => rows.push(normalize_row(&map, registry)),
            Ok(_) => {
                skipped += 1;
                warn!(line = lineno + 1, "snapshot line is not a JSON object, skipping");
            }
            Err(e) => {
                skipped += 1;
                warn!(line = lineno + 1, error = %e, "unparsable snapshot line, skipping");
            }
        }
    }

    let annotated = rows.iter().filter(|s| s.is_annotated()).count();
    info!(
        path = %path.display(),
        rows = rows.len(),
        annotated,
        skipped,
        "snapshots ingested"
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn norm(v: Value) -> Snapshot {
        normalize_row(v.as_object().unwrap(), &SeriesRegistry::default())
    }

    #[test]
    fn test_complete_row_has_no_annotations() {
        let s = norm(json!({
            "timestamp": "2025-03-01T10:15:00+08:00",
            "domain": "Example.AI",
            "series": "Identity Data",
            "request_count": 120,
            "mitigated": 4,
            "edge_served": 80,
            "origin_served": 40,
            "top_countries": {"tw": 60, "US": 20},
            "signal_hint": "spike",
            "notes": "GET /wp-login.php"
        }));
        assert_eq!(s.ts, "2025-03-01T02:15:00Z");
        assert_eq!(s.domain, "example.ai");
        assert_eq!(s.series, "identity_data");
        assert_eq!(s.series_raw, "Identity Data");
        assert_eq!(s.top_countries.get("TW"), Some(&60.0));
        assert!(s.missing_fields.is_empty());
        assert!(s.malformed_fields.is_empty());
        assert!(!s.is_annotated());
        assert_eq!(s.hour_key(), "2025-03-01T02");
    }

    #[test]
    fn test_missing_fields_are_defaulted_and_annotated() {
        let s = norm(json!({"date": "2025-03-02", "domain": "a.ai", "req": 50, "cf_served": 20}));
        assert_eq!(s.ts, "2025-03-02T00:00:00Z");
        assert_eq!(s.requests, 50);
        assert_eq!(s.edge_served, 20);
        assert_eq!(s.origin_served, 30);
        assert_eq!(s.signal_hint, "other");
        assert_eq!(s.series, "unmapped");
        assert_eq!(
            s.missing_fields,
            vec!["mitigated", "notes", "origin_served", "series", "signal_hint", "top_countries"]
        );
    }

    #[test]
    fn test_malformed_and_extra_fields() {
        let s = norm(json!({
            "ts": "not-a-time",
            "domain": "b.ai",
            "series": "x",
            "request_count": "lots",
            "top_countries": [1, 2],
            "colo": "TPE"
        }));
        assert_eq!(s.ts, EPOCH_TS);
        assert_eq!(s.requests, 0);
        assert!(s.malformed_fields.contains(&"ts".to_string()));
        assert!(s.malformed_fields.contains(&"request_count".to_string()));
        assert!(s.malformed_fields.contains(&"top_countries".to_string()));
        assert_eq!(s.extra_fields, vec!["colo"]);
    }

    #[test]
    fn test_read_jsonl_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.jsonl");
        std::fs::write(
            &path,
            "{\"ts\":\"2025-01-01T00:00:00Z\",\"domain\":\"a.ai\",\"series\":\"s\",\"req\":1}\n\n[1,2]\nnot json\n",
        )
        .unwrap();
        let rows = read_jsonl(&path, &SeriesRegistry::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].slot, 0);
    }

    #[test]
    fn test_slot_is_half_hour_bucket() {
        let a = norm(json!({"ts": "2025-01-01T00:29:59Z", "domain": "a"}));
        let b = norm(json!({"ts": "2025-01-01T00:30:00Z", "domain": "a"}));
        assert_eq!(b.slot - a.slot, 1);
    }
}
