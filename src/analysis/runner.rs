//! Staged batch pipeline for one snapshot file, from ingest to promotion.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::aggregator::SeriesFrame;
use crate::chain::{self, geo};
use crate::config::{ConfigSet, RadarConfig};
use crate::detect::anomaly::score_snapshots;
use crate::events::{self, strength::derive_spike_events, EventIndex, ForcingTable};
use crate::evidence::{self, DerivedOutputs, Manifest, RowCounts, MANIFEST_FILE, MANIFEST_VERSION};
use crate::gate::{self, QualityReport};
use crate::ingest;
use crate::persistence::{
    build_delta_series, compute_event_kernel, compute_tag_persistence, load_delta_artifact,
};
use crate::storage::{AnomalyRepo, ChainRepo, EventRepo, SnapshotRepo, SqliteStore};

pub const DB_FILE: &str = "radar.db";
pub const PERSISTENCE_FILE: &str = "persistence.json";
pub const KERNEL_FILE: &str = "event_kernel.json";

/// Inputs of one batch run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    /// Events JSONL. Spike events are derived from the snapshots when absent.
    pub events: Option<PathBuf>,
    /// Event forcing store. Forcing is zero when absent.
    pub forcing: Option<PathBuf>,
    /// Precomputed `deltaT_v1` artifact, tried before the stored projections.
    pub deltas: Option<PathBuf>,
    pub settings: RadarConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub run_dir: PathBuf,
    pub digest: String,
    pub counts: RowCounts,
    pub gate: QualityReport,
    /// `latest/` path when the run passed the gate.
    pub promoted: Option<PathBuf>,
}

fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

/// Run every stage, gate the result and promote it to `latest/` on success.
///
/// Fatal errors abort before promotion. A gate failure is not an error: the
/// summary carries the failed report and `promoted` stays `None`.
pub fn run_pipeline(opts: &RunOptions) -> Result<RunSummary> {
    let settings = &opts.settings;
    let configs = ConfigSet::load(&settings.config_dir).with_context(|| {
        format!(
            "failed to load configuration from {}",
            settings.config_dir.display()
        )
    })?;
    let geo_profile = configs.geo.profile(&settings.geo_profile)?.clone();

    let run_id = new_run_id();
    let run_dir = settings.output_dir.join("runs").join(&run_id);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create run directory {}", run_dir.display()))?;
    info!(%run_id, input = %opts.input.display(), "run started");

    let store = SqliteStore::open(&run_dir.join(DB_FILE))?;
    let mut counts = RowCounts::default();

    // 1. Ingest snapshots
    let snapshots = ingest::read_jsonl(&opts.input, &configs.series)?;
    counts.snapshots = store.replace_snapshots(&snapshots)?;

    // 2. Anomaly scoring
    let snapshots = store.load_snapshots()?;
    let records = score_snapshots(&snapshots, &configs.signals, &configs.chain.scoring)?;
    counts.anomaly_records = store.replace_anomalies(&records)?;

    // 3. Events: supplied file, else spikes derived from the snapshots
    let (event_rows, events_source) = match &opts.events {
        Some(path) => (events::load_jsonl(path, &configs.series)?, "file"),
        None => (derive_spike_events(&snapshots, &records), "derived"),
    };
    counts.events = store.replace_events(&event_rows, events_source)?;

    // 4. Chain propagation
    let records = store.load_anomalies()?;
    let event_index = EventIndex::new(store.load_events()?);
    let forcing = match &opts.forcing {
        Some(path) => ForcingTable::load(path)?,
        None => ForcingTable::default(),
    };
    let frame = SeriesFrame::from_records(&records);
    let mut chain_out = chain::build_chain(
        &frame,
        &event_index,
        &forcing,
        &configs.chain,
        settings.half_life_days,
    )?;

    // 5. Geo amplification
    let totals = geo::CountryTotals::from_snapshots(&snapshots);
    geo::apply(&mut chain_out.projections, &totals, &settings.geo_profile, &geo_profile);
    geo::apply(
        &mut chain_out.latest_projections,
        &totals,
        &settings.geo_profile,
        &geo_profile,
    );
    store.replace_chain(&chain_out)?;
    counts.chain_edges = chain_out.edges.len();
    counts.chain_edges_latest = chain_out.latest_edges.len();
    counts.series_chain = chain_out.projections.len();
    counts.series_chain_latest = chain_out.latest_projections.len();

    // 6. Persistence and event kernel
    let artifact = opts.deltas.as_deref().and_then(|path| {
        load_delta_artifact(path, &settings.geo_profile, configs.persistence.window)
    });
    let (deltas, delta_source) = match artifact {
        Some(series) => (series, "artifact"),
        None => (build_delta_series(&store.load_projections()?), "stored_projections"),
    };
    let persistence = compute_tag_persistence(&deltas, &configs.persistence);
    let latest_ts = frame.timestamps.last().cloned().unwrap_or_default();
    let kernel = compute_event_kernel(&records, &latest_ts, &configs.persistence);
    evidence::write_json(&run_dir.join(PERSISTENCE_FILE), &persistence)?;
    evidence::write_json(&run_dir.join(KERNEL_FILE), &kernel)?;

    // 7. Quality gate
    let report = {
        let conn = store.pool().get()?;
        gate::evaluate(&conn, Some(&persistence), &settings.gate)?
    };
    gate::write_report(&report, &run_dir.join("reports"))?;

    // 8. Manifest
    let digest = evidence::derived_digest(&DerivedOutputs {
        records: &records,
        chain: &chain_out,
        persistence: &persistence,
        kernel: &kernel,
    })?;
    let manifest = Manifest {
        version: MANIFEST_VERSION.to_string(),
        run_id: run_id.clone(),
        created_at: Utc::now(),
        input: opts.input.clone(),
        events_source: events_source.to_string(),
        delta_source: delta_source.to_string(),
        geo_profile: settings.geo_profile.clone(),
        half_life_days: settings.half_life_days,
        digest: digest.clone(),
        counts: counts.clone(),
        gate_ok: report.ok,
    };
    evidence::write_json(&run_dir.join(MANIFEST_FILE), &manifest)?;

    // Close the database before copying the run directory.
    drop(store);

    // 9. Promotion
    let promoted = if report.ok {
        Some(evidence::promote_to_latest(&run_dir, &settings.output_dir)?)
    } else {
        warn!(%run_id, failed = ?report.critical_failed, "run not promoted");
        None
    };

    info!(%run_id, %digest, promoted = promoted.is_some(), "run finished");
    Ok(RunSummary {
        run_id,
        run_dir,
        digest,
        counts,
        gate: report,
        promoted,
    })
}

/// Build the event forcing store from an event-map JSONL file.
pub fn build_forcing(input: &Path, output: &Path, tau: f64, config_dir: &Path) -> Result<()> {
    let configs = ConfigSet::load(config_dir)
        .with_context(|| format!("failed to load configuration from {}", config_dir.display()))?;
    let reservoir = events::reservoir::build_reservoir(input, &configs.series, tau)?;
    evidence::write_json(output, &reservoir)?;
    info!(output = %output.display(), hours = reservoir.e_decay.len(), "event forcing written");
    Ok(())
}
