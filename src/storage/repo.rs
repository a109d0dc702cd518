//! Stage repositories.
//!
//! Each stage replaces its own tables inside one transaction and reads its
//! upstream tables in full, in a fixed order.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Row, Transaction};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::SqliteStore;
use crate::chain::{ChainEdge, ChainOutput, LatestEdge, SeriesProjection, Status};
use crate::config::Level;
use crate::detect::AnomalyRecord;
use crate::events::Event;
use crate::ingest::Snapshot;

pub trait SnapshotRepo {
    fn replace_snapshots(&self, snapshots: &[Snapshot]) -> Result<usize>;
    /// All snapshots in insertion order.
    fn load_snapshots(&self) -> Result<Vec<Snapshot>>;
}

pub trait AnomalyRepo {
    fn replace_anomalies(&self, records: &[AnomalyRecord]) -> Result<usize>;
    /// All records ordered by `(ts, domain)`.
    fn load_anomalies(&self) -> Result<Vec<AnomalyRecord>>;
}

pub trait EventRepo {
    /// `source` tags the rows with where they came from (`file` or `derived`).
    fn replace_events(&self, events: &[Event], source: &str) -> Result<usize>;
    fn load_events(&self) -> Result<Vec<Event>>;
}

pub trait ChainRepo {
    fn replace_chain(&self, output: &ChainOutput) -> Result<()>;
    fn load_edges(&self) -> Result<Vec<ChainEdge>>;
    fn load_latest_edges(&self) -> Result<Vec<LatestEdge>>;
    fn load_projections(&self) -> Result<Vec<SeriesProjection>>;
    fn load_latest_projections(&self) -> Result<Vec<SeriesProjection>>;
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn conversion_err(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn level_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Level> {
    let raw: String = row.get(idx)?;
    Ok(Level::parse_lossy(&raw))
}

/// Non-finite floats are stored by SQLite as NULL.
fn real_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<f64> {
    Ok(row.get::<_, Option<f64>>(idx)?.unwrap_or(f64::NAN))
}

fn count_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    Ok(row.get::<_, i64>(idx)?.max(0) as usize)
}

fn json_text<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("failed to encode column")
}

impl SnapshotRepo for SqliteStore {
    fn replace_snapshots(&self, snapshots: &[Snapshot]) -> Result<usize> {
        let mut conn = self.pool().get()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM snapshots", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO snapshots (ts, slot, domain, series, series_raw, request_count,
                    mitigated, edge_served, origin_served, top_countries_json, signal_hint, notes,
                    missing_fields_json, malformed_fields_json, extra_fields_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;
            for s in snapshots {
                stmt.execute(params![
                    s.ts,
                    s.slot,
                    s.domain,
                    s.series,
                    s.series_raw,
                    to_i64(s.requests),
                    to_i64(s.mitigated),
                    to_i64(s.edge_served),
                    to_i64(s.origin_served),
                    json_text(&s.top_countries)?,
                    s.signal_hint,
                    s.notes,
                    json_text(&s.missing_fields)?,
                    json_text(&s.malformed_fields)?,
                    json_text(&s.extra_fields)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(rows = snapshots.len(), "snapshots stored");
        Ok(snapshots.len())
    }

    fn load_snapshots(&self) -> Result<Vec<Snapshot>> {
        let conn = self.pool().get()?;
        let mut stmt = conn.prepare(
            "SELECT ts, slot, domain, series, series_raw, request_count, mitigated, edge_served,
                    origin_served, top_countries_json, signal_hint, notes, missing_fields_json,
                    malformed_fields_json, extra_fields_json
             FROM snapshots ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            let count = |idx: usize| row.get::<_, i64>(idx).map(|n| n.max(0) as u64);
            Ok(Snapshot {
                ts: row.get(0)?,
                slot: row.get(1)?,
                domain: row.get(2)?,
                series: row.get(3)?,
                series_raw: row.get(4)?,
                requests: count(5)?,
                mitigated: count(6)?,
                edge_served: count(7)?,
                origin_served: count(8)?,
                top_countries: json_col(row, 9)?,
                signal_hint: row.get(10)?,
                notes: row.get(11)?,
                missing_fields: json_col(row, 12)?,
                malformed_fields: json_col(row, 13)?,
                extra_fields: json_col(row, 14)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read snapshots")
    }
}

impl AnomalyRepo for SqliteStore {
    fn replace_anomalies(&self, records: &[AnomalyRecord]) -> Result<usize> {
        let mut conn = self.pool().get()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM anomaly_records", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO anomaly_records (ts, domain, series, series_raw, heat, A, D, Hstar, W,
                    level_max, matched_signals_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.ts,
                    r.domain,
                    r.series,
                    r.series_raw,
                    r.heat,
                    r.a,
                    r.d,
                    r.hstar,
                    r.w,
                    r.level_max.as_str(),
                    json_text(&r.matched_signals)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(rows = records.len(), "anomaly records stored");
        Ok(records.len())
    }

    fn load_anomalies(&self) -> Result<Vec<AnomalyRecord>> {
        let conn = self.pool().get()?;
        let mut stmt = conn.prepare(
            "SELECT ts, domain, series, series_raw, heat, A, D, Hstar, W, level_max,
                    matched_signals_json
             FROM anomaly_records ORDER BY ts, domain, id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AnomalyRecord {
                ts: row.get(0)?,
                domain: row.get(1)?,
                series: row.get(2)?,
                series_raw: row.get(3)?,
                heat: real_col(row, 4)?,
                a: real_col(row, 5)?,
                d: real_col(row, 6)?,
                hstar: real_col(row, 7)?,
                w: real_col(row, 8)?,
                level_max: level_col(row, 9)?,
                matched_signals: json_col(row, 10)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read anomaly records")
    }
}

impl EventRepo for SqliteStore {
    fn replace_events(&self, events: &[Event], source: &str) -> Result<usize> {
        let mut conn = self.pool().get()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM events", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO events (date, domain, series, event_type, strength, event_level,
                    matched_signals_json, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for e in events {
                stmt.execute(params![
                    e.date.to_string(),
                    e.domain,
                    e.series,
                    e.event_type,
                    e.strength,
                    e.level.as_str(),
                    json_text(&e.matched_signals)?,
                    source,
                ])?;
            }
        }
        tx.commit()?;
        debug!(rows = events.len(), source, "events stored");
        Ok(events.len())
    }

    fn load_events(&self) -> Result<Vec<Event>> {
        let conn = self.pool().get()?;
        let mut stmt = conn.prepare(
            "SELECT date, domain, series, event_type, strength, event_level, matched_signals_json
             FROM events ORDER BY date, domain, id",
        )?;
        let rows = stmt.query_map([], |row| {
            let date = date_col(row, 0)?
                .ok_or_else(|| rusqlite::Error::InvalidColumnType(0, "date".into(), Type::Null))?;
            Ok(Event {
                date,
                domain: row.get(1)?,
                series: row.get(2)?,
                event_type: row.get(3)?,
                strength: real_col(row, 4)?,
                level: level_col(row, 5)?,
                matched_signals: json_col(row, 6)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read events")
    }
}

const PROJECTION_COLUMNS: &str = "ts, series, W, W_proj, forcing, status, chain_flag, top_src,
    share, push, push_raw, base_push, boosted_push, delta_boost, domains, L3_domains,
    max_event_level, geo_factor, tw_rank_score, geo_explain_json";

fn insert_projections(tx: &Transaction<'_>, table: &str, rows: &[SeriesProjection]) -> Result<()> {
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
            ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        table, PROJECTION_COLUMNS
    ))?;
    for p in rows {
        stmt.execute(params![
            p.ts,
            p.series,
            p.w,
            p.w_proj,
            p.forcing,
            p.status.as_str(),
            p.chain_flag,
            p.top_src,
            p.share,
            p.push,
            p.push_raw,
            p.base_push,
            p.boosted_push,
            p.delta_boost,
            p.domains as i64,
            p.l3_domains as i64,
            p.max_event_level.as_str(),
            p.geo_factor,
            p.tw_rank_score,
            json_text(&p.geo_explain)?,
        ])?;
    }
    Ok(())
}

fn projection_from_row(row: &Row<'_>) -> rusqlite::Result<SeriesProjection> {
    let status: String = row.get(5)?;
    Ok(SeriesProjection {
        ts: row.get(0)?,
        series: row.get(1)?,
        w: real_col(row, 2)?,
        w_proj: real_col(row, 3)?,
        forcing: real_col(row, 4)?,
        status: Status::parse_lossy(&status),
        chain_flag: row.get(6)?,
        top_src: row.get(7)?,
        share: real_col(row, 8)?,
        push: real_col(row, 9)?,
        push_raw: real_col(row, 10)?,
        base_push: real_col(row, 11)?,
        boosted_push: real_col(row, 12)?,
        delta_boost: real_col(row, 13)?,
        domains: count_col(row, 14)?,
        l3_domains: count_col(row, 15)?,
        max_event_level: level_col(row, 16)?,
        geo_factor: real_col(row, 17)?,
        tw_rank_score: real_col(row, 18)?,
        geo_explain: json_col(row, 19)?,
    })
}

impl SqliteStore {
    fn load_projection_table(&self, table: &str) -> Result<Vec<SeriesProjection>> {
        let conn = self.pool().get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY ts, series",
            PROJECTION_COLUMNS, table
        ))?;
        let rows = stmt.query_map([], projection_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("failed to read {}", table))
    }
}

impl ChainRepo for SqliteStore {
    fn replace_chain(&self, output: &ChainOutput) -> Result<()> {
        let mut conn = self.pool().get()?;
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM chain_edges;
             DELETE FROM chain_edges_latest;
             DELETE FROM series_chain;
             DELETE FROM series_chain_latest;",
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chain_edges (ts, src_series, dst_series, corr, delta_src,
                    boost_multiplier, base_score, boosted_score, delta_boost, src_event_date,
                    src_event_type, src_event_strength, src_event_decayed_strength, max_event_level)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for e in &output.edges {
                stmt.execute(params![
                    e.ts,
                    e.src,
                    e.dst,
                    e.corr,
                    e.delta_src,
                    e.boost_multiplier,
                    e.base_score,
                    e.boosted_score,
                    e.delta_boost,
                    e.src_event_date.map(|d| d.to_string()),
                    e.src_event_type,
                    e.src_event_strength,
                    e.src_event_decayed_strength,
                    e.max_event_level.as_str(),
                ])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO chain_edges_latest (ts, src_series, dst_series, share, base_score,
                    boosted_score, delta_boost, boost_multiplier, edge_n, src_event_date,
                    src_event_type, src_event_strength, src_event_decayed_strength, max_event_level)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for e in &output.latest_edges {
                stmt.execute(params![
                    e.ts,
                    e.src,
                    e.dst,
                    e.share,
                    e.base_score,
                    e.boosted_score,
                    e.delta_boost,
                    e.boost_multiplier,
                    e.edge_n as i64,
                    e.src_event_date.map(|d| d.to_string()),
                    e.src_event_type,
                    e.src_event_strength,
                    e.src_event_decayed_strength,
                    e.max_event_level.as_str(),
                ])?;
            }
        }
        insert_projections(&tx, "series_chain", &output.projections)?;
        insert_projections(&tx, "series_chain_latest", &output.latest_projections)?;
        tx.commit()?;
        debug!(
            edges = output.edges.len(),
            latest_edges = output.latest_edges.len(),
            projections = output.projections.len(),
            "chain tables stored"
        );
        Ok(())
    }

    fn load_edges(&self) -> Result<Vec<ChainEdge>> {
        let conn = self.pool().get()?;
        let mut stmt = conn.prepare(
            "SELECT ts, src_series, dst_series, corr, delta_src, boost_multiplier, base_score,
                    boosted_score, delta_boost, src_event_date, src_event_type, src_event_strength,
                    src_event_decayed_strength, max_event_level
             FROM chain_edges ORDER BY ts, dst_series, src_series",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ChainEdge {
                ts: row.get(0)?,
                src: row.get(1)?,
                dst: row.get(2)?,
                corr: real_col(row, 3)?,
                delta_src: real_col(row, 4)?,
                boost_multiplier: real_col(row, 5)?,
                base_score: real_col(row, 6)?,
                boosted_score: real_col(row, 7)?,
                delta_boost: real_col(row, 8)?,
                src_event_date: date_col(row, 9)?,
                src_event_type: row.get(10)?,
                src_event_strength: real_col(row, 11)?,
                src_event_decayed_strength: real_col(row, 12)?,
                max_event_level: level_col(row, 13)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read chain edges")
    }

    fn load_latest_edges(&self) -> Result<Vec<LatestEdge>> {
        let conn = self.pool().get()?;
        let mut stmt = conn.prepare(
            "SELECT ts, src_series, dst_series, share, base_score, boosted_score, delta_boost,
                    boost_multiplier, edge_n, src_event_date, src_event_type, src_event_strength,
                    src_event_decayed_strength, max_event_level
             FROM chain_edges_latest ORDER BY dst_series, src_series",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LatestEdge {
                ts: row.get(0)?,
                src: row.get(1)?,
                dst: row.get(2)?,
                share: real_col(row, 3)?,
                base_score: real_col(row, 4)?,
                boosted_score: real_col(row, 5)?,
                delta_boost: real_col(row, 6)?,
                boost_multiplier: real_col(row, 7)?,
                edge_n: count_col(row, 8)?,
                src_event_date: date_col(row, 9)?,
                src_event_type: row.get(10)?,
                src_event_strength: real_col(row, 11)?,
                src_event_decayed_strength: real_col(row, 12)?,
                max_event_level: level_col(row, 13)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read latest chain edges")
    }

    fn load_projections(&self) -> Result<Vec<SeriesProjection>> {
        self.load_projection_table("series_chain")
    }

    fn load_latest_projections(&self) -> Result<Vec<SeriesProjection>> {
        self.load_projection_table("series_chain_latest")
    }
}
