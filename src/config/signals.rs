//! Signal dictionary: severity levels and weighted match rules.

use std::collections::BTreeMap;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::{check_version, read_json, ConfigError};

pub const SIGNALS_VERSION: &str = "signals_v1";

/// Severity level of a matched signal. Ordering follows severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Level {
    #[default]
    L1,
    L2,
    L3,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::L1 => "L1",
            Level::L2 => "L2",
            Level::L3 => "L3",
        }
    }

    /// Parse a stored level, falling back to L1 for unknown labels.
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim() {
            "L3" => Level::L3,
            "L2" => Level::L2,
            _ => Level::L1,
        }
    }

    /// Top severity counts toward the diffusion ratio `D`.
    pub fn is_top(&self) -> bool {
        matches!(self, Level::L3)
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelSpec {
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelWeights {
    #[serde(rename = "L1")]
    pub l1: LevelSpec,
    #[serde(rename = "L2")]
    pub l2: LevelSpec,
    #[serde(rename = "L3")]
    pub l3: LevelSpec,
}

impl LevelWeights {
    pub fn weight(&self, level: Level) -> f64 {
        match level {
            Level::L1 => self.l1.weight,
            Level::L2 => self.l2.weight,
            Level::L3 => self.l3.weight,
        }
    }
}

/// One weighted match rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRule {
    pub id: String,
    pub level: Level,
    pub weight: f64,
    /// Case-insensitive substrings; any hit matches the rule.
    #[serde(default)]
    pub match_any: Vec<String>,
    /// Case-insensitive regular expressions; any hit matches the rule.
    #[serde(default)]
    pub match_regex: Vec<String>,
    #[serde(skip)]
    compiled: Vec<Regex>,
}

impl SignalRule {
    fn compile(&mut self) -> Result<(), ConfigError> {
        let mut compiled = Vec::with_capacity(self.match_regex.len());
        for pattern in self.match_regex.iter().filter(|p| !p.trim().is_empty()) {
            let re = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    ConfigError::invalid(
                        "signals.json",
                        format!("signal '{}' has an invalid pattern {:?}: {}", self.id, pattern, e),
                    )
                })?;
            compiled.push(re);
        }
        self.compiled = compiled;
        Ok(())
    }

    /// True when a substring token occurs in `lowered` (the lower-cased
    /// `text`) or a compiled pattern matches `text`.
    pub fn matches(&self, text: &str, lowered: &str) -> bool {
        self.match_any
            .iter()
            .map(|t| t.trim().to_lowercase())
            .any(|t| !t.is_empty() && lowered.contains(&t))
            || self.compiled.iter().any(|re| re.is_match(text))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDictionary {
    pub version: String,
    pub levels: LevelWeights,
    pub signals: Vec<SignalRule>,
    /// Bonus per coarse traffic-shape hint; `other` is the fallback key.
    #[serde(default)]
    pub hint_weights: BTreeMap<String, f64>,
}

impl Default for SignalDictionary {
    fn default() -> Self {
        Self {
            version: SIGNALS_VERSION.to_string(),
            levels: LevelWeights {
                l1: LevelSpec { weight: 1.0 },
                l2: LevelSpec { weight: 1.5 },
                l3: LevelSpec { weight: 2.0 },
            },
            signals: Vec::new(),
            hint_weights: BTreeMap::from([("other".to_string(), 0.0)]),
        }
    }
}

impl SignalDictionary {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut dict: Self = read_json(path)?;
        dict.validate()?;
        dict.compile()?;
        Ok(dict)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_version("signals.json", SIGNALS_VERSION, &self.version)?;
        for level in [Level::L1, Level::L2, Level::L3] {
            let w = self.levels.weight(level);
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::invalid(
                    "signals.json",
                    format!("level {} weight must be a finite value >= 0", level),
                ));
            }
        }
        let mut seen = std::collections::BTreeSet::new();
        for rule in &self.signals {
            if rule.id.trim().is_empty() {
                return Err(ConfigError::invalid("signals.json", "signal with empty id"));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(ConfigError::invalid(
                    "signals.json",
                    format!("duplicate signal id '{}'", rule.id),
                ));
            }
            if !rule.weight.is_finite() {
                return Err(ConfigError::invalid(
                    "signals.json",
                    format!("signal '{}' has a non-finite weight", rule.id),
                ));
            }
            if rule
                .match_any
                .iter()
                .chain(&rule.match_regex)
                .all(|t| t.trim().is_empty())
            {
                return Err(ConfigError::invalid(
                    "signals.json",
                    format!("signal '{}' has no match tokens", rule.id),
                ));
            }
        }
        Ok(())
    }

    /// Build every rule's regular expressions. `load` does this after
    /// validation; an invalid pattern is rejected.
    pub fn compile(&mut self) -> Result<(), ConfigError> {
        self.signals.iter_mut().try_for_each(SignalRule::compile)
    }

    /// Bonus for a traffic-shape hint, falling back to `other`, then 0.
    pub fn hint_bonus(&self, hint: &str) -> f64 {
        self.hint_weights
            .get(hint)
            .or_else(|| self.hint_weights.get("other"))
            .copied()
            .unwrap_or(0.0)
    }
}
