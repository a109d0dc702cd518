//! Persistence (trend) detection settings.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{check_version, read_json, ConfigError};

pub const PERSISTENCE_VERSION: &str = "persistence_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErsThresholds {
    pub watch_p: f64,
    pub watch_streak: usize,
    pub eligible_p: f64,
    pub eligible_streak: usize,
}

impl Default for ErsThresholds {
    fn default() -> Self {
        Self {
            watch_p: 0.55,
            watch_streak: 3,
            eligible_p: 0.70,
            eligible_streak: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    pub top_k_domains: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { top_k_domains: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistenceDocument {
    version: String,
    window: usize,
    #[serde(default)]
    alpha: Option<f64>,
    eps: f64,
    ers_thresholds: ErsThresholds,
    #[serde(default)]
    kernel: KernelConfig,
}

/// Validated persistence settings with `alpha` resolved.
#[derive(Debug, Clone, Serialize)]
pub struct PersistenceConfig {
    pub version: String,
    pub window: usize,
    pub alpha: f64,
    pub eps: f64,
    pub ers_thresholds: ErsThresholds,
    pub kernel: KernelConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self::with_window(16)
    }
}

impl PersistenceConfig {
    /// Defaults with `alpha = 2/(window+1)`.
    pub fn with_window(window: usize) -> Self {
        Self {
            version: PERSISTENCE_VERSION.to_string(),
            window,
            alpha: 2.0 / (window as f64 + 1.0),
            eps: 0.01,
            ers_thresholds: ErsThresholds::default(),
            kernel: KernelConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let doc: PersistenceDocument = read_json(path)?;
        check_version("persistence.json", PERSISTENCE_VERSION, &doc.version)?;
        let cfg = Self {
            version: doc.version,
            window: doc.window,
            alpha: doc.alpha.unwrap_or(2.0 / (doc.window as f64 + 1.0)),
            eps: doc.eps,
            ers_thresholds: doc.ers_thresholds,
            kernel: doc.kernel,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        const DOC: &str = "persistence.json";
        if self.window == 0 {
            return Err(ConfigError::invalid(DOC, "window must be > 0"));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(ConfigError::invalid(DOC, "alpha must be in (0,1]"));
        }
        if !(self.eps.is_finite() && self.eps > 0.0) {
            return Err(ConfigError::invalid(DOC, "eps must be > 0"));
        }
        let th = &self.ers_thresholds;
        if !((0.0..=1.0).contains(&th.watch_p) && (0.0..=1.0).contains(&th.eligible_p)) {
            return Err(ConfigError::invalid(DOC, "p thresholds must be in [0,1]"));
        }
        if th.watch_streak == 0 || th.eligible_streak == 0 {
            return Err(ConfigError::invalid(DOC, "streak thresholds must be > 0"));
        }
        if th.eligible_p < th.watch_p {
            return Err(ConfigError::invalid(DOC, "eligible_p must be >= watch_p"));
        }
        if th.eligible_streak < th.watch_streak {
            return Err(ConfigError::invalid(DOC, "eligible_streak must be >= watch_streak"));
        }
        if self.kernel.top_k_domains == 0 {
            return Err(ConfigError::invalid(DOC, "kernel.top_k_domains must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("persistence.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_alpha_defaults_from_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"version":"persistence_v1","window":6,"eps":0.01,
                "ers_thresholds":{"watch_p":0.55,"watch_streak":3,"eligible_p":0.7,"eligible_streak":5}}"#,
        );
        let cfg = PersistenceConfig::load(&path).unwrap();
        assert!((cfg.alpha - 2.0 / 7.0).abs() < 1e-12);
        assert_eq!(cfg.kernel.top_k_domains, 3);
    }

    #[test]
    fn test_eligible_weaker_than_watch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"version":"persistence_v1","window":6,"eps":0.01,
                "ers_thresholds":{"watch_p":0.6,"watch_streak":3,"eligible_p":0.5,"eligible_streak":5}}"#,
        );
        let err = PersistenceConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("eligible_p"));

        let path = write(
            &dir,
            r#"{"version":"persistence_v1","window":6,"eps":0.01,
                "ers_thresholds":{"watch_p":0.5,"watch_streak":4,"eligible_p":0.7,"eligible_streak":2}}"#,
        );
        let err = PersistenceConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("eligible_streak"));
    }

    #[test]
    fn test_bad_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"{"version":"persistence_v0","window":6,"eps":0.01,
                "ers_thresholds":{"watch_p":0.55,"watch_streak":3,"eligible_p":0.7,"eligible_streak":5}}"#,
        );
        assert!(matches!(
            PersistenceConfig::load(&path),
            Err(ConfigError::Version { .. })
        ));
    }

    #[test]
    fn test_alpha_out_of_range_rejected() {
        let cfg = PersistenceConfig {
            alpha: 1.5,
            ..PersistenceConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
