//! Precomputed per-tag delta artifacts (`deltaT_v1`).
//!
//! An artifact replaces the deltas derived from stored projections when it is
//! usable: accepted version, matching geo profile, strictly increasing finite
//! points and at least `window` distinct timestamps. Anything else is logged
//! and the caller falls back to the stored projections.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use super::DeltaSeries;

pub const DELTA_ARTIFACT_VERSION: &str = "deltaT_v1";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPoint {
    Pair(String, f64),
    Keyed {
        #[serde(alias = "t")]
        ts: String,
        #[serde(alias = "value", alias = "v")]
        delta: f64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntries {
    Points(Vec<RawPoint>),
    ByTs(BTreeMap<String, f64>),
}

#[derive(Debug, Deserialize)]
struct RawTagRow {
    tag: String,
    #[serde(alias = "values", alias = "points", alias = "data")]
    series: RawEntries,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTags {
    ByTag(BTreeMap<String, RawEntries>),
    Rows(Vec<RawTagRow>),
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    version: String,
    #[serde(default)]
    geo: String,
    #[serde(alias = "vectors", alias = "series")]
    tags: RawTags,
}

/// Lower-case, with anything outside `[a-z0-9_-]` mapped to `_`.
fn profile_token(raw: &str) -> String {
    let token: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let token = token.trim_matches('_');
    if token.is_empty() {
        "unknown".to_string()
    } else {
        token.to_string()
    }
}

fn canonical_points(entries: RawEntries) -> Result<Vec<(String, f64)>, String> {
    let points: Vec<(String, f64)> = match entries {
        RawEntries::ByTs(map) => map.into_iter().collect(),
        RawEntries::Points(points) => points
            .into_iter()
            .map(|p| match p {
                RawPoint::Pair(ts, v) => (ts.trim().to_string(), v),
                RawPoint::Keyed { ts, delta } => (ts.trim().to_string(), delta),
            })
            .collect(),
    };
    let mut prev: Option<&str> = None;
    for (ts, value) in &points {
        if ts.is_empty() {
            return Err("point without ts".to_string());
        }
        if prev.is_some_and(|p| ts.as_str() <= p) {
            return Err(format!("ts {} is not strictly increasing", ts));
        }
        if !value.is_finite() {
            return Err(format!("non-finite value at {}", ts));
        }
        prev = Some(ts.as_str());
    }
    Ok(points)
}

fn canonical_tags(tags: RawTags) -> Result<DeltaSeries, String> {
    let rows: Vec<(String, RawEntries)> = match tags {
        RawTags::ByTag(map) => map.into_iter().collect(),
        RawTags::Rows(rows) => rows.into_iter().map(|r| (r.tag, r.series)).collect(),
    };
    let mut out = DeltaSeries::new();
    for (tag, entries) in rows {
        let tag = tag.trim().to_string();
        if tag.is_empty() {
            return Err("empty tag".to_string());
        }
        if out.contains_key(&tag) {
            return Err(format!("duplicate tag {}", tag));
        }
        let points = canonical_points(entries).map_err(|e| format!("tag {}: {}", tag, e))?;
        if !points.is_empty() {
            out.insert(tag, points);
        }
    }
    if out.is_empty() {
        return Err("no tag series".to_string());
    }
    Ok(out)
}

/// Read a delta artifact for `geo_profile`. `None` means fall back.
pub fn load_delta_artifact(path: &Path, geo_profile: &str, window: usize) -> Option<DeltaSeries> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "delta artifact unreadable, using stored projections");
            return None;
        }
    };
    let raw: RawArtifact = match serde_json::from_str(&content) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "delta artifact unparsable, using stored projections");
            return None;
        }
    };
    if raw.version.trim() != DELTA_ARTIFACT_VERSION {
        warn!(path = %path.display(), version = %raw.version, "delta artifact version not accepted");
        return None;
    }
    if profile_token(&raw.geo) != profile_token(geo_profile) {
        warn!(path = %path.display(), geo = %raw.geo, profile = geo_profile, "delta artifact is for another geo profile");
        return None;
    }
    let series = match canonical_tags(raw.tags) {
        Ok(series) => series,
        Err(reason) => {
            warn!(path = %path.display(), %reason, "delta artifact rejected");
            return None;
        }
    };
    let timestamps: BTreeSet<&str> = series
        .values()
        .flat_map(|points| points.iter().map(|(ts, _)| ts.as_str()))
        .collect();
    if timestamps.len() < window {
        warn!(
            path = %path.display(),
            timestamps = timestamps.len(),
            window,
            "delta artifact shorter than the persistence window"
        );
        return None;
    }
    info!(path = %path.display(), tags = series.len(), "using delta artifact");
    Some(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, body: serde_json::Value) -> std::path::PathBuf {
        let path = dir.path().join("deltaT_v1_nearby.json");
        std::fs::write(&path, body.to_string()).unwrap();
        path
    }

    #[test]
    fn test_accepts_every_point_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            serde_json::json!({
                "version": "deltaT_v1",
                "geo": "Nearby",
                "tags": {
                    "gov": [["t1", 0.1], ["t2", 0.2]],
                    "telecom": [{"ts": "t1", "delta": -0.1}, {"t": "t3", "v": 0.0}],
                    "finance": {"t2": 0.05, "t1": 0.01}
                }
            }),
        );
        let series = load_delta_artifact(&path, "nearby", 3).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series["gov"], vec![("t1".to_string(), 0.1), ("t2".to_string(), 0.2)]);
        assert_eq!(series["telecom"][1], ("t3".to_string(), 0.0));
        assert_eq!(series["finance"][0].0, "t1");
    }

    #[test]
    fn test_row_list_form() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            serde_json::json!({
                "version": "deltaT_v1",
                "geo": "nearby",
                "series": [{"tag": "gov", "points": [["t1", 0.1], ["t2", 0.3]]}]
            }),
        );
        let series = load_delta_artifact(&path, "nearby", 2).unwrap();
        assert_eq!(series["gov"].len(), 2);
    }

    #[test]
    fn test_unusable_artifacts_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let ok = serde_json::json!({
            "version": "deltaT_v1", "geo": "nearby",
            "tags": {"gov": [["t1", 0.1], ["t2", 0.2]]}
        });
        let path = write(&dir, ok.clone());
        // Too few timestamps, wrong profile.
        assert!(load_delta_artifact(&path, "nearby", 3).is_none());
        assert!(load_delta_artifact(&path, "tw", 2).is_none());

        let mut wrong_version = ok;
        wrong_version["version"] = "tag_vector_v1".into();
        assert!(load_delta_artifact(&write(&dir, wrong_version), "nearby", 2).is_none());

        let unordered = serde_json::json!({
            "version": "deltaT_v1", "geo": "nearby",
            "tags": {"gov": [["t2", 0.1], ["t1", 0.2]]}
        });
        assert!(load_delta_artifact(&write(&dir, unordered), "nearby", 2).is_none());

        std::fs::write(&path, "not json").unwrap();
        assert!(load_delta_artifact(&path, "nearby", 1).is_none());
        assert!(load_delta_artifact(&dir.path().join("absent.json"), "nearby", 1).is_none());
    }
}
