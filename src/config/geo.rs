//! Geo-compatibility profiles.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{check_version, read_json, ConfigError};

pub const GEO_PROFILES_VERSION: &str = "geo_profiles_v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoProfile {
    pub enabled: bool,
    /// Minimum summed country count before the factor applies.
    pub min_total: f64,
    /// Per-country share cap in `[0,1]`.
    pub cap_share: f64,
    /// Saturation constant: `factor = raw / (raw + alpha)`.
    pub alpha: f64,
    /// Country code (upper-case) to weight.
    pub weights: BTreeMap<String, f64>,
}

impl GeoProfile {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            min_total: 0.0,
            cap_share: 1.0,
            alpha: 1.0,
            weights: BTreeMap::new(),
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        const DOC: &str = "geo_profiles.json";
        if !(self.min_total.is_finite() && self.min_total >= 0.0) {
            return Err(ConfigError::invalid(DOC, format!("profile '{}': min_total must be >= 0", name)));
        }
        if !(0.0..=1.0).contains(&self.cap_share) {
            return Err(ConfigError::invalid(DOC, format!("profile '{}': cap_share must be in [0,1]", name)));
        }
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(ConfigError::invalid(DOC, format!("profile '{}': alpha must be > 0", name)));
        }
        for (country, weight) in &self.weights {
            if country.trim().is_empty() {
                return Err(ConfigError::invalid(DOC, format!("profile '{}': empty country code", name)));
            }
            if !(weight.is_finite() && *weight >= 0.0) {
                return Err(ConfigError::invalid(
                    DOC,
                    format!("profile '{}': weight for {} must be >= 0", name, country),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoProfiles {
    pub version: String,
    pub profiles: BTreeMap<String, GeoProfile>,
}

impl Default for GeoProfiles {
    fn default() -> Self {
        Self {
            version: GEO_PROFILES_VERSION.to_string(),
            profiles: BTreeMap::from([("none".to_string(), GeoProfile::disabled())]),
        }
    }
}

impl GeoProfiles {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut doc: Self = read_json(path)?;
        doc.normalize();
        doc.validate()?;
        Ok(doc)
    }

    /// Upper-case and trim country codes so lookups match snapshot data.
    fn normalize(&mut self) {
        for profile in self.profiles.values_mut() {
            let weights = std::mem::take(&mut profile.weights);
            profile.weights = weights
                .into_iter()
                .map(|(k, v)| (k.trim().to_uppercase(), v))
                .collect();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_version("geo_profiles.json", GEO_PROFILES_VERSION, &self.version)?;
        if !self.profiles.contains_key("none") {
            return Err(ConfigError::invalid(
                "geo_profiles.json",
                "missing required profile 'none'",
            ));
        }
        for (name, profile) in &self.profiles {
            profile.validate(name)?;
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Result<&GeoProfile, ConfigError> {
        self.profiles.get(name).ok_or_else(|| {
            let available = self.profiles.keys().cloned().collect::<Vec<_>>().join(", ");
            ConfigError::invalid(
                "geo_profiles.json",
                format!("unknown geo profile '{}'. Available: {}", name, available),
            )
        })
    }
}
