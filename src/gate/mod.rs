//! Post-hoc quality gate over a finished run.
//!
//! Reads the run database and the persistence artifact, never the in-memory
//! pipeline state, so the same checks apply to any run directory on disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::GateConfig;
use crate::ingest::EPOCH_TS;
use crate::persistence::PersistenceReport;

pub const REPORT_VERSION: &str = "eval_quality_v1";
pub const REPORT_FILE: &str = "eval_quality.json";

/// Slack for comparing decayed float sums.
const SCORE_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
    Warning,
}

/// Outcome of a single check.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CheckResult {
    pub name: String,
    /// Offending row count, or the measured ratio.
    pub value: f64,
    pub critical: bool,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QualityReport {
    pub version: String,
    pub checks: Vec<CheckResult>,
    pub missing_fields_rows: i64,
    pub missing_fields_ratio: f64,
    pub critical_failed: Vec<String>,
    pub ok: bool,
}

impl QualityReport {
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

fn count(conn: &Connection, sql: &str) -> Result<i64> {
    conn.query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("gate query failed: {}", sql.trim()))
}

fn critical(name: &str, offending: i64, details: impl Into<String>) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        value: offending as f64,
        critical: true,
        status: if offending > 0 {
            CheckStatus::Fail
        } else {
            CheckStatus::Pass
        },
        details: details.into(),
    }
}

fn out_of_order(conn: &Connection) -> Result<i64> {
    count(
        conn,
        "WITH ordered AS (
            SELECT domain, ts, id,
                   LAG(ts) OVER (PARTITION BY domain ORDER BY id) AS prev_ts
            FROM snapshots
         )
         SELECT COUNT(*) FROM ordered WHERE prev_ts IS NOT NULL AND ts < prev_ts",
    )
}

/// Run every check. `persistence` is `None` when the artifact is missing,
/// which fails its range check.
pub fn evaluate(
    conn: &Connection,
    persistence: Option<&PersistenceReport>,
    cfg: &GateConfig,
) -> Result<QualityReport> {
    let mut checks = Vec::new();

    // 1. Anomaly records
    let anomalies = count(conn, "SELECT COUNT(*) FROM anomaly_records")?;
    checks.push(critical(
        "anomaly_empty",
        i64::from(anomalies == 0),
        format!("{} anomaly rows", anomalies),
    ));
    let dup = count(
        conn,
        "SELECT COUNT(*) FROM (
            SELECT ts, domain FROM anomaly_records GROUP BY ts, domain HAVING COUNT(*) > 1
         )",
    )?;
    checks.push(critical("dup_anomaly_pk", dup, "duplicated (ts, domain) keys"));
    let non_finite = count(
        conn,
        "SELECT COUNT(*) FROM anomaly_records
         WHERE ts IS NULL OR ts = ''
            OR heat IS NULL OR A IS NULL OR D IS NULL OR Hstar IS NULL OR W IS NULL
            OR ABS(heat) > 1e308 OR ABS(A) > 1e308 OR ABS(D) > 1e308
            OR ABS(Hstar) > 1e308 OR ABS(W) > 1e308
            OR W < 0",
    )?;
    checks.push(critical(
        "metrics_non_finite",
        non_finite,
        "null, non-finite or negative W",
    ));

    // 2. Chain tables
    let edges_invalid = count(
        conn,
        &format!(
            "SELECT
               (SELECT COUNT(*) FROM chain_edges
                WHERE ABS(corr) > 1e308 OR ABS(base_score) > 1e308 OR ABS(boosted_score) > 1e308
                   OR boosted_score < base_score - {tol})
             + (SELECT COUNT(*) FROM chain_edges_latest
                WHERE ABS(base_score) > 1e308 OR ABS(boosted_score) > 1e308
                   OR boosted_score < base_score - {tol})",
            tol = SCORE_TOLERANCE
        ),
    )?;
    checks.push(critical(
        "edges_invalid",
        edges_invalid,
        "non-finite edge scores or boosted below base",
    ));
    let latest_projections = count(conn, "SELECT COUNT(*) FROM series_chain_latest")?;
    checks.push(critical(
        "projections_empty",
        i64::from(latest_projections == 0),
        format!("{} latest projections", latest_projections),
    ));
    let latest_edges = count(conn, "SELECT COUNT(*) FROM chain_edges_latest")?;
    checks.push(CheckResult {
        name: "edges_empty".to_string(),
        value: f64::from(u8::from(latest_edges == 0)),
        critical: false,
        status: if latest_edges == 0 {
            CheckStatus::Warning
        } else {
            CheckStatus::Pass
        },
        details: format!("{} latest edges", latest_edges),
    });

    // 3. Snapshots
    let missing_ts = count(
        conn,
        &format!(
            "SELECT COUNT(*) FROM snapshots WHERE ts IS NULL OR ts = '' OR ts = '{}'",
            EPOCH_TS
        ),
    )?;
    checks.push(critical("missing_ts", missing_ts, "snapshots without a timestamp"));
    checks.push(critical(
        "ts_out_of_order",
        out_of_order(conn)?,
        "per-domain timestamp regressions in input order",
    ));
    let total = count(conn, "SELECT COUNT(*) FROM snapshots")?;
    let missing_rows = count(
        conn,
        "SELECT COUNT(*) FROM snapshots
         WHERE COALESCE(missing_fields_json, '[]') NOT IN ('[]', '')",
    )?;
    let ratio = if total > 0 {
        missing_rows as f64 / total as f64
    } else {
        0.0
    };
    let abnormal = ratio > cfg.missing_ratio_threshold;
    checks.push(CheckResult {
        name: "missing_fields_ratio_abnormal".to_string(),
        value: ratio,
        critical: true,
        status: if abnormal {
            CheckStatus::Fail
        } else {
            CheckStatus::Pass
        },
        details: format!(
            "{}/{} rows annotated, threshold {}",
            missing_rows, total, cfg.missing_ratio_threshold
        ),
    });

    // 4. Persistence artifact
    let persistence_check = match persistence {
        Some(report) => {
            let bad = report
                .tags
                .iter()
                .filter(|t| !(0.0..=1.0).contains(&t.p))
                .count();
            critical(
                "persistence_out_of_range",
                bad as i64,
                format!("{} tags checked", report.tags.len()),
            )
        }
        None => critical("persistence_out_of_range", 1, "persistence artifact missing"),
    };
    checks.push(persistence_check);

    let critical_failed: Vec<String> = checks
        .iter()
        .filter(|c| c.critical && c.status == CheckStatus::Fail)
        .map(|c| c.name.clone())
        .collect();
    let ok = critical_failed.is_empty();
    if ok {
        info!(checks = checks.len(), "quality gate passed");
    } else {
        warn!(failed = ?critical_failed, "quality gate failed");
    }

    Ok(QualityReport {
        version: REPORT_VERSION.to_string(),
        checks,
        missing_fields_rows: missing_rows,
        missing_fields_ratio: ratio,
        critical_failed,
        ok,
    })
}

/// Evaluate a run directory containing `radar.db` and `persistence.json`.
pub fn evaluate_run_dir(run_dir: &Path, cfg: &GateConfig) -> Result<QualityReport> {
    let db_path = run_dir.join("radar.db");
    if !db_path.exists() {
        anyhow::bail!("run database not found: {}", db_path.display());
    }
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    let persistence_path = run_dir.join("persistence.json");
    let persistence: Option<PersistenceReport> = match std::fs::read_to_string(&persistence_path) {
        Ok(content) => Some(
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", persistence_path.display()))?,
        ),
        Err(_) => None,
    };

    evaluate(&conn, persistence.as_ref(), cfg)
}

/// Write the report to `<dir>/eval_quality.json`.
pub fn write_report(report: &QualityReport, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(REPORT_FILE);
    let body = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{Ers, TagState};
    use crate::storage::schema::migrate;

    fn db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn
    }

    fn seed_clean(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO snapshots (ts, slot, domain, series, series_raw, request_count, mitigated,
                edge_served, origin_served, signal_hint)
             VALUES ('2025-03-01T00:00:00Z', 0, 'a', 's', 's', 10, 0, 0, 10, 'other'),
                    ('2025-03-01T01:00:00Z', 2, 'a', 's', 's', 10, 0, 0, 10, 'other');
             INSERT INTO anomaly_records (ts, domain, series, series_raw, heat, A, D, Hstar, W)
             VALUES ('2025-03-01T00:00:00Z', 'a', 's', 's', 1, 0, 0, 1, 0.5),
                    ('2025-03-01T01:00:00Z', 'a', 's', 's', 1, 0, 0, 1, 0.6);
             INSERT INTO series_chain_latest (ts, series, W, W_proj, status, chain_flag, share,
                push, push_raw, base_push, boosted_push, delta_boost, domains, L3_domains)
             VALUES ('2025-03-01T01:00:00Z', 's', 0.6, 0.6, 'stable', 0, 0, 0, 0, 0, 0, 0, 1, 0);",
        )
        .unwrap();
    }

    fn persistence(p: f64) -> PersistenceReport {
        PersistenceReport {
            version: "persistence_v1".to_string(),
            window: 6,
            latest_ts: "2025-03-01T01:00:00Z".to_string(),
            tags: vec![TagState {
                tag: "s".to_string(),
                delta: 0.0,
                m: 0.0,
                c: 0.0,
                p,
                dir: "0".to_string(),
                streak: 0,
                ers: Ers::None,
            }],
        }
    }

    #[test]
    fn test_clean_run_passes_with_empty_edges_as_warning() {
        let conn = db();
        seed_clean(&conn);
        let report = evaluate(&conn, Some(&persistence(0.0)), &GateConfig::default()).unwrap();
        assert!(report.ok, "failed: {:?}", report.critical_failed);
        assert_eq!(report.check("edges_empty").unwrap().status, CheckStatus::Warning);
    }

    #[test]
    fn test_empty_db_fails_required_outputs() {
        let report = evaluate(&db(), Some(&persistence(0.0)), &GateConfig::default()).unwrap();
        assert!(!report.ok);
        assert!(report.critical_failed.contains(&"anomaly_empty".to_string()));
        assert!(report.critical_failed.contains(&"projections_empty".to_string()));
    }

    #[test]
    fn test_duplicates_and_negative_w_fail() {
        let conn = db();
        seed_clean(&conn);
        conn.execute_batch(
            "INSERT INTO anomaly_records (ts, domain, series, series_raw, heat, A, D, Hstar, W)
             VALUES ('2025-03-01T01:00:00Z', 'a', 's', 's', 1, 0, 0, 1, -0.1);",
        )
        .unwrap();
        let report = evaluate(&conn, Some(&persistence(0.0)), &GateConfig::default()).unwrap();
        assert_eq!(
            report.critical_failed,
            vec!["dup_anomaly_pk".to_string(), "metrics_non_finite".to_string()]
        );
    }

    #[test]
    fn test_out_of_order_snapshots_fail() {
        let conn = db();
        seed_clean(&conn);
        conn.execute_batch(
            "INSERT INTO snapshots (ts, slot, domain, series, series_raw, request_count, mitigated,
                edge_served, origin_served, signal_hint)
             VALUES ('2025-02-28T23:00:00Z', 0, 'a', 's', 's', 10, 0, 0, 10, 'other');",
        )
        .unwrap();
        let report = evaluate(&conn, Some(&persistence(0.0)), &GateConfig::default()).unwrap();
        assert_eq!(report.check("ts_out_of_order").unwrap().value, 1.0);
        assert!(!report.ok);
    }

    #[test]
    fn test_missing_ratio_and_persistence_range() {
        let conn = db();
        seed_clean(&conn);
        conn.execute("UPDATE snapshots SET missing_fields_json = '[\"notes\"]'", [])
            .unwrap();
        let report = evaluate(&conn, Some(&persistence(1.5)), &GateConfig::default()).unwrap();
        assert_eq!(report.missing_fields_ratio, 1.0);
        assert!(report
            .critical_failed
            .contains(&"missing_fields_ratio_abnormal".to_string()));
        assert!(report
            .critical_failed
            .contains(&"persistence_out_of_range".to_string()));

        let lenient = GateConfig {
            missing_ratio_threshold: 1.0,
        };
        let report = evaluate(&conn, None, &lenient).unwrap();
        assert_eq!(report.critical_failed, vec!["persistence_out_of_range".to_string()]);
    }

    #[test]
    fn test_report_written() {
        let dir = tempfile::tempdir().unwrap();
        let report = evaluate(&db(), Some(&persistence(0.0)), &GateConfig::default()).unwrap();
        let path = write_report(&report, &dir.path().join("reports")).unwrap();
        let back: QualityReport =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back.ok, report.ok);
    }
}
