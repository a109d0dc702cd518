//! Run artifacts: JSON outputs, the derived-output digest, the manifest and
//! promotion of a passing run to `latest/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::chain::ChainOutput;
use crate::detect::AnomalyRecord;
use crate::persistence::{EventKernel, PersistenceReport};

pub const MANIFEST_VERSION: &str = "manifest_v1";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const LATEST_DIR: &str = "latest";

/// Pretty-print `value` as JSON to `path`, creating parent directories.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

/// Everything the digest covers, borrowed from the pipeline.
pub struct DerivedOutputs<'a> {
    pub records: &'a [AnomalyRecord],
    pub chain: &'a ChainOutput,
    pub persistence: &'a PersistenceReport,
    pub kernel: &'a EventKernel,
}

fn update_section<T: Serialize>(hasher: &mut Sha256, name: &str, value: &T) -> Result<()> {
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(serde_json::to_vec(value).with_context(|| format!("failed to encode {}", name))?);
    hasher.update([0u8]);
    Ok(())
}

/// Hex SHA-256 over the canonical JSON of every derived output, in a fixed
/// section order. Maps serialise with sorted keys.
pub fn derived_digest(outputs: &DerivedOutputs<'_>) -> Result<String> {
    let mut hasher = Sha256::new();
    update_section(&mut hasher, "anomaly_records", &outputs.records)?;
    update_section(&mut hasher, "chain_edges", &outputs.chain.edges)?;
    update_section(&mut hasher, "chain_edges_latest", &outputs.chain.latest_edges)?;
    update_section(&mut hasher, "series_chain", &outputs.chain.projections)?;
    update_section(&mut hasher, "series_chain_latest", &outputs.chain.latest_projections)?;
    update_section(&mut hasher, "persistence", outputs.persistence)?;
    update_section(&mut hasher, "event_kernel", outputs.kernel)?;
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowCounts {
    pub snapshots: usize,
    pub anomaly_records: usize,
    pub events: usize,
    pub chain_edges: usize,
    pub chain_edges_latest: usize,
    pub series_chain: usize,
    pub series_chain_latest: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub input: PathBuf,
    pub events_source: String,
    /// `artifact` or `stored_projections`.
    pub delta_source: String,
    pub geo_profile: String,
    pub half_life_days: f64,
    pub digest: String,
    pub counts: RowCounts,
    pub gate_ok: bool,
}

impl Manifest {
    pub fn load(run_dir: &Path) -> Result<Self> {
        let path = run_dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("failed to list {}", src.display()))? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to)
                .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
        }
    }
    Ok(())
}

/// Replace `<output_dir>/latest` with a copy of `run_dir`.
///
/// The copy is staged in a sibling temp directory and renamed into place, so
/// `latest/` is never left half-written.
pub fn promote_to_latest(run_dir: &Path, output_dir: &Path) -> Result<PathBuf> {
    let run_name = run_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "run".to_string());
    let staging = output_dir.join(format!(".latest.tmp-{}", run_name));
    let previous = output_dir.join(".latest.old");
    let latest = output_dir.join(LATEST_DIR);

    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    copy_dir(run_dir, &staging)?;

    if previous.exists() {
        fs::remove_dir_all(&previous)?;
    }
    if latest.exists() {
        fs::rename(&latest, &previous)
            .with_context(|| format!("failed to move aside {}", latest.display()))?;
    }
    fs::rename(&staging, &latest)
        .with_context(|| format!("failed to promote {}", run_dir.display()))?;
    if previous.exists() {
        fs::remove_dir_all(&previous)?;
    }

    info!(run = %run_name, latest = %latest.display(), "run promoted");
    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(latest_ts: &str) -> PersistenceReport {
        PersistenceReport {
            version: "persistence_v1".to_string(),
            window: 6,
            latest_ts: latest_ts.to_string(),
            tags: Vec::new(),
        }
    }

    fn kernel() -> EventKernel {
        EventKernel {
            version: "event_kernel_v1".to_string(),
            window: 6,
            latest_ts: String::new(),
            tags: Vec::new(),
            top_domains: Vec::new(),
        }
    }

    #[test]
    fn test_digest_is_stable_and_content_sensitive() {
        let chain = ChainOutput::default();
        let k = kernel();
        let a = report("t1");
        let b = report("t2");
        let digest = |p: &PersistenceReport| {
            derived_digest(&DerivedOutputs {
                records: &[],
                chain: &chain,
                persistence: p,
                kernel: &k,
            })
            .unwrap()
        };
        assert_eq!(digest(&a), digest(&a));
        assert_ne!(digest(&a), digest(&b));
        assert_eq!(digest(&a).len(), 64);
    }

    #[test]
    fn test_promote_replaces_latest() {
        let out = tempfile::tempdir().unwrap();
        let run1 = out.path().join("runs").join("r1");
        write_json(&run1.join("reports").join("eval_quality.json"), &serde_json::json!({"ok": true}))
            .unwrap();
        write_json(&run1.join("persistence.json"), &report("t1")).unwrap();
        let latest = promote_to_latest(&run1, out.path()).unwrap();
        assert!(latest.join("reports").join("eval_quality.json").exists());

        let run2 = out.path().join("runs").join("r2");
        write_json(&run2.join("persistence.json"), &report("t2")).unwrap();
        promote_to_latest(&run2, out.path()).unwrap();
        let promoted: PersistenceReport =
            serde_json::from_str(&fs::read_to_string(latest.join("persistence.json")).unwrap())
                .unwrap();
        assert_eq!(promoted.latest_ts, "t2");
        assert!(!latest.join("reports").exists());
        assert!(!out.path().join(".latest.old").exists());
    }
}
