//! End-to-end pipeline runs over the demo data.

use std::path::{Path, PathBuf};

use pressureradar::config::RadarConfig;
use pressureradar::evidence::Manifest;
use pressureradar::persistence::PersistenceReport;
use pressureradar::storage::{ChainRepo, EventRepo, SqliteStore};
use pressureradar::{run_pipeline, RunOptions};

fn repo_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(rel)
}

fn options(output: &Path, geo_profile: &str) -> RunOptions {
    RunOptions {
        input: repo_path("demos/snapshots.jsonl"),
        events: None,
        forcing: None,
        deltas: None,
        settings: RadarConfig {
            output_dir: output.to_path_buf(),
            config_dir: repo_path("config"),
            geo_profile: geo_profile.to_string(),
            ..RadarConfig::default()
        },
    }
}

#[test]
fn test_demo_run_passes_gate_and_promotes() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run_pipeline(&options(dir.path(), "nearby")).unwrap();

    assert!(summary.gate.ok, "gate failed: {:?}", summary.gate.critical_failed);
    assert_eq!(summary.counts.snapshots, 720);
    assert_eq!(summary.counts.anomaly_records, 720);
    assert_eq!(summary.counts.series_chain_latest, 3);
    assert_eq!(summary.counts.series_chain, 3 * 119);

    let latest = summary.promoted.clone().unwrap();
    for file in ["radar.db", "persistence.json", "event_kernel.json", "manifest.json"] {
        assert!(latest.join(file).exists(), "{} missing from latest/", file);
    }
    assert!(latest.join("reports").join("eval_quality.json").exists());

    let manifest = Manifest::load(&latest).unwrap();
    assert_eq!(manifest.digest, summary.digest);
    assert_eq!(manifest.run_id, summary.run_id);
    assert_eq!(manifest.events_source, "derived");
    assert_eq!(manifest.delta_source, "stored_projections");
    assert!(manifest.gate_ok);
}

#[test]
fn test_identical_inputs_give_identical_digest() {
    let dir = tempfile::tempdir().unwrap();
    let first = run_pipeline(&options(dir.path(), "nearby")).unwrap();
    let second = run_pipeline(&options(dir.path(), "nearby")).unwrap();
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.digest, second.digest);
    assert_eq!(first.digest.len(), 64);
}

#[test]
fn test_disabled_geo_profile_leaves_scores_unamplified() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run_pipeline(&options(dir.path(), "none")).unwrap();
    let store = SqliteStore::open(&summary.run_dir.join("radar.db")).unwrap();
    let projections = store.load_latest_projections().unwrap();
    assert!(!projections.is_empty());
    for p in projections {
        assert_eq!(p.geo_factor, 0.0);
        assert_eq!(p.tw_rank_score, p.boosted_push);
    }
}

#[test]
fn test_chain_invariants_hold_on_demo_data() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run_pipeline(&options(dir.path(), "nearby")).unwrap();
    let store = SqliteStore::open(&summary.run_dir.join("radar.db")).unwrap();
    for edge in store.load_edges().unwrap() {
        assert!(edge.delta_src > 0.0);
        assert!(edge.corr > 0.0);
        assert!(edge.boosted_score >= edge.base_score);
        assert_ne!(edge.src, edge.dst);
    }
    for edge in store.load_latest_edges().unwrap() {
        assert!(edge.boosted_score >= edge.base_score);
        assert!(edge.edge_n > 0);
    }
}

#[test]
fn test_supplied_events_and_forcing_are_used() {
    let dir = tempfile::tempdir().unwrap();
    let events = dir.path().join("events.jsonl");
    std::fs::write(
        &events,
        concat!(
            r#"{"date":"2025-03-04","domain":"moi.gov.example","series":"government","type":"spike","strength":8.0,"event_level":"L3"}"#,
            "\n",
        ),
    )
    .unwrap();
    let forcing = dir.path().join("forcing.json");
    pressureradar::analysis::runner::build_forcing(
        &repo_path("demos/event_maps.jsonl"),
        &forcing,
        12.0,
        &repo_path("config"),
    )
    .unwrap();

    let mut opts = options(dir.path(), "nearby");
    opts.events = Some(events);
    opts.forcing = Some(forcing);
    let summary = run_pipeline(&opts).unwrap();
    assert_eq!(summary.counts.events, 1);

    let store = SqliteStore::open(&summary.run_dir.join("radar.db")).unwrap();
    let stored = store.load_events().unwrap();
    assert_eq!(stored[0].series, "gov");
    let forced: Vec<_> = store
        .load_projections()
        .unwrap()
        .into_iter()
        .filter(|p| p.series == "gov" && p.forcing > 0.0)
        .collect();
    assert!(!forced.is_empty());
    for p in forced {
        assert!(p.w_proj + 1e-12 >= p.w + p.forcing);
    }
}

#[test]
fn test_missing_forcing_file_degrades_to_zero() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(dir.path(), "nearby");
    opts.forcing = Some(dir.path().join("absent.json"));
    let summary = run_pipeline(&opts).unwrap();
    let store = SqliteStore::open(&summary.run_dir.join("radar.db")).unwrap();
    assert!(store
        .load_projections()
        .unwrap()
        .iter()
        .all(|p| p.forcing == 0.0));
}

#[test]
fn test_unknown_geo_profile_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = run_pipeline(&options(dir.path(), "mars")).unwrap_err();
    assert!(format!("{:#}", err).contains("unknown geo profile"));
    assert!(!dir.path().join("latest").exists());
}

fn persistence_tags(run_dir: &Path) -> Vec<String> {
    let report: PersistenceReport = serde_json::from_str(
        &std::fs::read_to_string(run_dir.join("persistence.json")).unwrap(),
    )
    .unwrap();
    let mut tags: Vec<String> = report.tags.into_iter().map(|t| t.tag).collect();
    tags.sort();
    tags
}

fn write_delta_artifact(dir: &Path, geo: &str) -> PathBuf {
    let points = |step: f64| -> Vec<serde_json::Value> {
        (0..8)
            .map(|i| serde_json::json!([format!("2025-03-05T{:02}:00:00Z", i), step * i as f64]))
            .collect()
    };
    let path = dir.join("deltaT_v1.json");
    let body = serde_json::json!({
        "version": "deltaT_v1",
        "geo": geo,
        "tags": { "alpha": points(0.01), "beta": points(-0.02) }
    });
    std::fs::write(&path, body.to_string()).unwrap();
    path
}

#[test]
fn test_delta_artifact_feeds_persistence() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(dir.path(), "nearby");
    opts.deltas = Some(write_delta_artifact(dir.path(), "nearby"));
    let summary = run_pipeline(&opts).unwrap();

    assert!(summary.gate.ok, "gate failed: {:?}", summary.gate.critical_failed);
    assert_eq!(persistence_tags(&summary.run_dir), vec!["alpha", "beta"]);
    let manifest = Manifest::load(&summary.run_dir).unwrap();
    assert_eq!(manifest.delta_source, "artifact");
}

#[test]
fn test_delta_artifact_for_other_profile_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = options(dir.path(), "nearby");
    opts.deltas = Some(write_delta_artifact(dir.path(), "tw"));
    let summary = run_pipeline(&opts).unwrap();

    assert_eq!(persistence_tags(&summary.run_dir), vec!["finance", "gov", "telecom"]);
    let manifest = Manifest::load(&summary.run_dir).unwrap();
    assert_eq!(manifest.delta_source, "stored_projections");
}
