//! Run settings and the versioned JSON configuration documents.
//!
//! Two layers:
//! - `RadarConfig` (TOML) carries the run-level knobs: output directory, where the
//!   JSON documents live, event half-life, geo profile and gate tolerances. It is
//!   looked up via `RADAR_CONFIG`, then `./radar.toml`, then compiled-in defaults.
//! - The JSON documents (`signals.json`, `chain.json`, `geo_profiles.json`,
//!   `persistence.json`, optional `series_aliases.json`) are parsed into typed
//!   structs and validated on load. A version string mismatch is fatal.

pub mod chain;
pub mod geo;
pub mod persistence;
pub mod series;
pub mod signals;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use self::chain::{ChainConfig, ScoringParams};
pub use self::geo::{GeoProfile, GeoProfiles};
pub use self::persistence::{ErsThresholds, PersistenceConfig};
pub use self::series::SeriesRegistry;
pub use self::signals::{Level, SignalDictionary, SignalRule};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    Missing(PathBuf),
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{document}: version {found:?} does not match expected {expected:?}")]
    Version {
        document: &'static str,
        expected: &'static str,
        found: String,
    },
    #[error("{document}: {reason}")]
    Invalid {
        document: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(document: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            document,
            reason: reason.into(),
        }
    }
}

/// Read a JSON document from disk into `T`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content =
        std::fs::read_to_string(path).map_err(|_| ConfigError::Missing(path.to_path_buf()))?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn check_version(
    document: &'static str,
    expected: &'static str,
    found: &str,
) -> Result<(), ConfigError> {
    if found != expected {
        return Err(ConfigError::Version {
            document,
            expected,
            found: found.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run settings
// ---------------------------------------------------------------------------

/// Root run-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Root for `runs/`, `latest/` and `reports/`.
    pub output_dir: PathBuf,
    /// Directory holding the versioned JSON documents.
    pub config_dir: PathBuf,
    /// Half-life (days) for event strength decay.
    pub half_life_days: f64,
    /// Name of the geo profile used for `tw_rank_score`.
    pub geo_profile: String,
    pub gate: GateConfig,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            config_dir: PathBuf::from("config"),
            half_life_days: 7.0,
            geo_profile: "none".to_string(),
            gate: GateConfig::default(),
        }
    }
}

/// Quality gate tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum share of snapshot rows allowed to carry missing-field annotations.
    pub missing_ratio_threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            missing_ratio_threshold: 0.25,
        }
    }
}

impl RadarConfig {
    /// Load run settings from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded radar configuration");
        Ok(config)
    }

    /// Try, in order: `RADAR_CONFIG`, `./radar.toml`, compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("RADAR_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "RADAR_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new("radar.toml");
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "radar.toml exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no radar.toml found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Document bundle
// ---------------------------------------------------------------------------

/// Every JSON document a run needs, validated.
#[derive(Debug, Clone)]
pub struct ConfigSet {
    pub signals: SignalDictionary,
    pub chain: ChainConfig,
    pub geo: GeoProfiles,
    pub persistence: PersistenceConfig,
    pub series: SeriesRegistry,
}

impl ConfigSet {
    /// Load all documents from `dir`. Only `series_aliases.json` is optional.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let signals = SignalDictionary::load(&dir.join("signals.json"))?;
        let chain = ChainConfig::load(&dir.join("chain.json"))?;
        let geo = GeoProfiles::load(&dir.join("geo_profiles.json"))?;
        let persistence = PersistenceConfig::load(&dir.join("persistence.json"))?;

        let aliases = dir.join("series_aliases.json");
        let series = if aliases.exists() {
            SeriesRegistry::load(&aliases)?
        } else {
            debug!(dir = %dir.display(), "no series_aliases.json, series names pass through");
            SeriesRegistry::default()
        };

        info!(
            dir = %dir.display(),
            signals = signals.signals.len(),
            geo_profiles = geo.profiles.len(),
            "loaded configuration documents"
        );
        Ok(Self {
            signals,
            chain,
            geo,
            persistence,
            series,
        })
    }
}

impl Default for ConfigSet {
    fn default() -> Self {
        Self {
            signals: SignalDictionary::default(),
            chain: ChainConfig::default(),
            geo: GeoProfiles::default(),
            persistence: PersistenceConfig::default(),
            series: SeriesRegistry::default(),
        }
    }
}
