//! Historical events: loading, derivation, per-series profiles and the
//! decayed forcing reservoir.

pub mod profile;
pub mod reservoir;
pub mod strength;

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::config::{Level, SeriesRegistry};

pub use self::profile::{event_boost, EventIndex, EventProfile};
pub use self::reservoir::ForcingTable;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {reason}")]
    Record {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("forcing store {path} is not valid: {source}")]
    Forcing {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A dated event attributed to one entity and series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Calendar day, `YYYY-MM-DD`.
    pub date: NaiveDate,
    pub domain: String,
    pub series: String,
    pub event_type: String,
    /// Strength on a 0..10 scale.
    pub strength: f64,
    pub level: Level,
    #[serde(default)]
    pub matched_signals: Vec<String>,
}

fn parse_event(value: &Value, registry: &SeriesRegistry) -> Result<Event, String> {
    let obj = value.as_object().ok_or("event is not a JSON object")?;
    let text = |keys: &[&str]| {
        keys.iter()
            .filter_map(|k| obj.get(*k))
            .find_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
    };

    let date_raw = text(&["date", "ts"]).ok_or("event has no date")?;
    let date = date_raw
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .ok_or_else(|| format!("unparsable event date {:?}", date_raw))?;

    let domain = text(&["domain"]).unwrap_or_default().to_lowercase();
    let series_raw = text(&["series", "series_raw"]).unwrap_or_default();
    let series = registry.resolve(&series_raw, &domain);

    let strength = obj
        .get("strength")
        .and_then(Value::as_f64)
        .filter(|s| s.is_finite())
        .unwrap_or(0.0);
    let level = text(&["event_level", "level"])
        .map(|l| Level::parse_lossy(&l))
        .unwrap_or_default();
    let matched_signals = obj
        .get("matched_signals")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    Ok(Event {
        date,
        domain,
        series,
        event_type: text(&["event_type", "type"]).unwrap_or_else(|| "event".to_string()),
        strength,
        level,
        matched_signals,
    })
}

/// Load an events JSONL file. Any unusable line is an error: the file was
/// supplied explicitly, so a partial read would silently change boosts.
pub fn load_jsonl(path: &Path, registry: &SeriesRegistry) -> Result<Vec<Event>, EventError> {
    let file = std::fs::File::open(path).map_err(|source| EventError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut events = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| EventError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = |reason: String| EventError::Record {
            path: path.to_path_buf(),
            line: idx + 1,
            reason,
        };
        let value: Value = serde_json::from_str(&line).map_err(|e| record(e.to_string()))?;
        events.push(parse_event(&value, registry).map_err(record)?);
    }
    info!(path = %path.display(), events = events.len(), "events loaded");
    Ok(events)
}
