//! Per-entity anomaly scoring.

pub mod anomaly;
pub mod heat;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Level;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("snapshot source is empty: nothing to score")]
    EmptySnapshots,
}

/// Scores for one entity at one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub ts: String,
    pub domain: String,
    pub series: String,
    pub series_raw: String,
    pub heat: f64,
    /// Log-ratio of heat to the entity's baseline heat.
    #[serde(rename = "A")]
    pub a: f64,
    /// Share of co-timestamp entities at the top severity level.
    #[serde(rename = "D")]
    pub d: f64,
    #[serde(rename = "Hstar")]
    pub hstar: f64,
    /// Decayed, log-compressed pressure; never negative.
    #[serde(rename = "W")]
    pub w: f64,
    pub level_max: Level,
    pub matched_signals: Vec<String>,
}
