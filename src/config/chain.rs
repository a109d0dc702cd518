//! Chain thresholds and the scoring constants they are tuned against.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{check_version, read_json, ConfigError};

pub const CHAIN_VERSION: &str = "chain_v1";

/// Constants of the per-entity anomaly score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringParams {
    /// Amplification of the positive anomaly ratio `A`.
    pub alpha: f64,
    /// Amplification of the diffusion ratio `D`.
    pub beta: f64,
    /// Trailing slots folded into `W`.
    pub window: usize,
    /// Geometric decay per slot inside the `W` window.
    pub decay: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            alpha: 0.8,
            beta: 1.2,
            window: 16,
            decay: 0.92,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub version: String,
    /// Correlation window K (points).
    pub window: usize,
    /// Time constant for the latest decayed rollup, in timestamp steps.
    pub tau: f64,
    /// `W` / `W_proj` level at which a series is sustained.
    pub th_sus: f64,
    /// `W_proj` level at which a series is rising.
    pub th_rise: f64,
    /// Minimum projected uplift for a chain flag.
    pub min_uplift: f64,
    /// Share of the uplift the top source must carry for a chain flag.
    pub dominance: f64,
    /// Edges whose boosted score falls below this are dropped.
    pub edge_floor: f64,
    pub scoring: ScoringParams,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            version: CHAIN_VERSION.to_string(),
            window: 16,
            tau: 12.0,
            th_sus: 1.80,
            th_rise: 1.20,
            min_uplift: 0.06,
            dominance: 0.5,
            edge_floor: 1e-6,
            scoring: ScoringParams::default(),
        }
    }
}

impl ChainConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let cfg: Self = read_json(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        const DOC: &str = "chain.json";
        check_version(DOC, CHAIN_VERSION, &self.version)?;
        if self.window < 4 {
            return Err(ConfigError::invalid(DOC, "window must be >= 4 (pearson needs 4 points)"));
        }
        if !(self.tau.is_finite() && self.tau > 0.0) {
            return Err(ConfigError::invalid(DOC, "tau must be > 0"));
        }
        if self.th_rise > self.th_sus {
            return Err(ConfigError::invalid(DOC, "th_rise must be <= th_sus"));
        }
        if !(0.0..=1.0).contains(&self.dominance) {
            return Err(ConfigError::invalid(DOC, "dominance must be in [0,1]"));
        }
        if self.min_uplift < 0.0 || self.edge_floor < 0.0 {
            return Err(ConfigError::invalid(DOC, "min_uplift and edge_floor must be >= 0"));
        }
        let s = &self.scoring;
        if s.window == 0 {
            return Err(ConfigError::invalid(DOC, "scoring.window must be > 0"));
        }
        if !(s.decay > 0.0 && s.decay <= 1.0) {
            return Err(ConfigError::invalid(DOC, "scoring.decay must be in (0,1]"));
        }
        if s.alpha < 0.0 || s.beta < 0.0 {
            return Err(ConfigError::invalid(DOC, "scoring.alpha and scoring.beta must be >= 0"));
        }
        Ok(())
    }
}
