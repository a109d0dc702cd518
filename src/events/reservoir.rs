//! Decayed event forcing, keyed by hour bucket and series.
//!
//! The builder reads event-map lines `{ts, maps: [{series, energy}]}` and
//! writes `{meta, E_raw, E_decay}`. The chain stage only reads `E_decay`.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SeriesRegistry;
use crate::events::EventError;
use crate::ingest::hour_key;

pub const FORCING_VERSION: &str = "event_forcing_v1";
/// Scale applied to raw map energy before it enters the reservoir.
pub const LAMBDA_EVENT: f64 = 0.20;

/// hour bucket (`YYYY-MM-DDTHH`) -> series -> value
pub type HourSeries = BTreeMap<String, BTreeMap<String, f64>>;

#[derive(Debug, Deserialize)]
struct EventMapLine {
    ts: String,
    #[serde(default)]
    maps: Vec<SeriesEnergy>,
}

#[derive(Debug, Deserialize)]
struct SeriesEnergy {
    series: String,
    #[serde(default)]
    energy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservoirMeta {
    pub version: String,
    pub tau: f64,
    pub lambda_event: f64,
    pub slotting: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservoir {
    pub meta: ReservoirMeta,
    #[serde(rename = "E_raw")]
    pub e_raw: HourSeries,
    #[serde(rename = "E_decay")]
    pub e_decay: HourSeries,
}

/// Per hour and series, the largest scaled energy seen.
pub fn build_raw(path: &Path, registry: &SeriesRegistry) -> Result<HourSeries, EventError> {
    let file = std::fs::File::open(path).map_err(|source| EventError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut raw = HourSeries::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|source| EventError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: EventMapLine = serde_json::from_str(&line).map_err(|e| EventError::Record {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: e.to_string(),
        })?;
        let hour = hour_key(parsed.ts.trim()).to_string();
        for map in parsed.maps {
            let series = registry.resolve(&map.series, "");
            let energy = map.energy * LAMBDA_EVENT;
            let slot = raw.entry(hour.clone()).or_default().entry(series).or_insert(0.0);
            if energy > *slot {
                *slot = energy;
            }
        }
    }
    Ok(raw)
}

/// Forward accumulation: every successive hour bucket decays the running
/// total by `exp(-1/tau)` before that hour's raw energy is added.
pub fn compute_decayed(raw: &HourSeries, tau: f64) -> HourSeries {
    let step = (-1.0 / tau).exp();
    let mut accum: BTreeMap<String, f64> = BTreeMap::new();
    let mut out = HourSeries::new();
    for (hour, energies) in raw {
        for value in accum.values_mut() {
            *value *= step;
        }
        for (series, energy) in energies {
            *accum.entry(series.clone()).or_insert(0.0) += energy;
        }
        out.insert(hour.clone(), accum.clone());
    }
    out
}

pub fn build_reservoir(path: &Path, registry: &SeriesRegistry, tau: f64) -> Result<Reservoir, EventError> {
    let e_raw = build_raw(path, registry)?;
    let e_decay = compute_decayed(&e_raw, tau);
    info!(
        path = %path.display(),
        hours = e_raw.len(),
        tau,
        "event forcing reservoir built"
    );
    Ok(Reservoir {
        meta: ReservoirMeta {
            version: FORCING_VERSION.to_string(),
            tau,
            lambda_event: LAMBDA_EVENT,
            slotting: "hourly_bucket".to_string(),
        },
        e_raw,
        e_decay,
    })
}

#[derive(Debug, Deserialize)]
struct ForcingDocument {
    #[serde(rename = "E_decay", default)]
    e_decay: HourSeries,
}

/// Read-only view of `E_decay` used when projecting series.
#[derive(Debug, Default, Clone)]
pub struct ForcingTable {
    decay: HourSeries,
}

impl ForcingTable {
    pub fn new(decay: HourSeries) -> Self {
        Self { decay }
    }

    /// An absent file means no forcing; a present but unreadable one is an error.
    pub fn load(path: &Path) -> Result<Self, EventError> {
        if !path.exists() {
            warn!(path = %path.display(), "event forcing store not found, forcing is zero");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| EventError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: ForcingDocument = serde_json::from_str(&content).map_err(|source| EventError::Forcing {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), hours = doc.e_decay.len(), "event forcing loaded");
        Ok(Self { decay: doc.e_decay })
    }

    pub fn is_empty(&self) -> bool {
        self.decay.is_empty()
    }

    /// Forcing for `series` at the hour bucket of `ts`, zero when absent.
    pub fn get(&self, ts: &str, series: &str) -> f64 {
        self.decay
            .get(hour_key(ts))
            .and_then(|m| m.get(series))
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }
}
