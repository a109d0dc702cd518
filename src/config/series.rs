//! Series alias registry: maps raw series labels (or domains) to canonical series.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;

use super::{check_version, read_json, ConfigError};

pub const SERIES_ALIASES_VERSION: &str = "series_aliases_v1";

#[derive(Debug, Deserialize)]
struct AliasDocument {
    version: String,
    default_series: String,
    #[serde(default)]
    canonical_series: Vec<String>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

/// Without a document loaded the registry only normalises labels and maps
/// empty labels to `unmapped`.
#[derive(Debug, Clone)]
pub struct SeriesRegistry {
    default_series: String,
    canonical: BTreeSet<String>,
    aliases: BTreeMap<String, String>,
    passthrough: bool,
}

impl Default for SeriesRegistry {
    fn default() -> Self {
        Self {
            default_series: "unmapped".to_string(),
            canonical: BTreeSet::new(),
            aliases: BTreeMap::new(),
            passthrough: true,
        }
    }
}

/// Lower-case, collapse whitespace and dashes to `_`, drop other punctuation.
pub fn normalize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars().flat_map(|c| c.to_lowercase()) {
        if ch.is_whitespace() || ch == '-' {
            pending_sep = true;
            continue;
        }
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '.' {
            if pending_sep {
                out.push('_');
                pending_sep = false;
            }
            out.push(ch);
        }
    }
    out
}

impl SeriesRegistry {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let doc: AliasDocument = read_json(path)?;
        check_version("series_aliases.json", SERIES_ALIASES_VERSION, &doc.version)?;
        let default_series = normalize_key(&doc.default_series);
        if default_series.is_empty() {
            return Err(ConfigError::invalid("series_aliases.json", "default_series is empty"));
        }

        let mut canonical: BTreeSet<String> =
            doc.canonical_series.iter().map(|s| normalize_key(s)).collect();
        canonical.insert(default_series.clone());

        let mut aliases = BTreeMap::new();
        for (k, v) in &doc.aliases {
            let (key, val) = (normalize_key(k), normalize_key(v));
            if !key.is_empty() && !val.is_empty() {
                aliases.insert(key, val);
            }
        }
        for c in &canonical {
            aliases.insert(c.clone(), c.clone());
        }

        Ok(Self {
            default_series,
            canonical,
            aliases,
            passthrough: false,
        })
    }

    /// Resolve a raw label, then the domain, then fall back to the default series.
    pub fn resolve(&self, raw: &str, domain: &str) -> String {
        let key = normalize_key(raw);
        if let Some(hit) = self.aliases.get(&key) {
            return hit.clone();
        }
        if let Some(hit) = self.aliases.get(&normalize_key(domain)) {
            return hit.clone();
        }
        if self.passthrough && !key.is_empty() {
            return key;
        }
        self.default_series.clone()
    }

    pub fn canonical(&self) -> &BTreeSet<String> {
        &self.canonical
    }
}
