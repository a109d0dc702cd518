//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

pub const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY,
            ts TEXT NOT NULL,
            slot INTEGER NOT NULL,
            domain TEXT NOT NULL,
            series TEXT NOT NULL,
            series_raw TEXT NOT NULL,
            request_count INTEGER NOT NULL,
            mitigated INTEGER NOT NULL,
            edge_served INTEGER NOT NULL,
            origin_served INTEGER NOT NULL,
            top_countries_json TEXT NOT NULL DEFAULT '{}',
            signal_hint TEXT NOT NULL,
            notes TEXT NOT NULL DEFAULT '',
            missing_fields_json TEXT NOT NULL DEFAULT '[]',
            malformed_fields_json TEXT NOT NULL DEFAULT '[]',
            extra_fields_json TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_snapshots_domain_ts ON snapshots(domain, ts);

        -- No primary key: duplicates are a quality-gate finding, not an insert error.
        CREATE TABLE IF NOT EXISTS anomaly_records (
            id INTEGER PRIMARY KEY,
            ts TEXT NOT NULL,
            domain TEXT NOT NULL,
            series TEXT NOT NULL,
            series_raw TEXT NOT NULL,
            heat REAL,
            A REAL,
            D REAL,
            Hstar REAL,
            W REAL,
            level_max TEXT NOT NULL DEFAULT 'L1',
            matched_signals_json TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_anomaly_ts_domain ON anomaly_records(ts, domain);

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY,
            date TEXT NOT NULL,
            domain TEXT NOT NULL,
            series TEXT NOT NULL,
            event_type TEXT NOT NULL,
            strength REAL NOT NULL,
            event_level TEXT NOT NULL DEFAULT 'L1',
            matched_signals_json TEXT NOT NULL DEFAULT '[]',
            source TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chain_edges (
            ts TEXT NOT NULL,
            src_series TEXT NOT NULL,
            dst_series TEXT NOT NULL,
            corr REAL NOT NULL,
            delta_src REAL NOT NULL,
            boost_multiplier REAL NOT NULL,
            base_score REAL NOT NULL,
            boosted_score REAL NOT NULL,
            delta_boost REAL NOT NULL,
            src_event_date TEXT,
            src_event_type TEXT NOT NULL DEFAULT '',
            src_event_strength REAL NOT NULL DEFAULT 0,
            src_event_decayed_strength REAL NOT NULL DEFAULT 0,
            max_event_level TEXT NOT NULL DEFAULT 'L1',
            PRIMARY KEY (ts, src_series, dst_series)
        );
        CREATE INDEX IF NOT EXISTS idx_edges_ts_dst ON chain_edges(ts, dst_series);

        CREATE TABLE IF NOT EXISTS chain_edges_latest (
            ts TEXT NOT NULL,
            src_series TEXT NOT NULL,
            dst_series TEXT NOT NULL,
            share REAL NOT NULL,
            base_score REAL NOT NULL,
            boosted_score REAL NOT NULL,
            delta_boost REAL NOT NULL,
            boost_multiplier REAL NOT NULL,
            edge_n INTEGER NOT NULL,
            src_event_date TEXT,
            src_event_type TEXT NOT NULL DEFAULT '',
            src_event_strength REAL NOT NULL DEFAULT 0,
            src_event_decayed_strength REAL NOT NULL DEFAULT 0,
            max_event_level TEXT NOT NULL DEFAULT 'L1',
            PRIMARY KEY (src_series, dst_series)
        );

        CREATE TABLE IF NOT EXISTS series_chain (
            ts TEXT NOT NULL,
            series TEXT NOT NULL,
            W REAL NOT NULL,
            W_proj REAL NOT NULL,
            forcing REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            chain_flag INTEGER NOT NULL,
            top_src TEXT,
            share REAL NOT NULL,
            push REAL NOT NULL,
            push_raw REAL NOT NULL,
            base_push REAL NOT NULL,
            boosted_push REAL NOT NULL,
            delta_boost REAL NOT NULL,
            domains INTEGER NOT NULL,
            L3_domains INTEGER NOT NULL,
            max_event_level TEXT NOT NULL DEFAULT 'L1',
            geo_factor REAL NOT NULL DEFAULT 0,
            tw_rank_score REAL NOT NULL DEFAULT 0,
            geo_explain_json TEXT NOT NULL DEFAULT 'null',
            PRIMARY KEY (ts, series)
        );
        CREATE INDEX IF NOT EXISTS idx_series_chain_ts ON series_chain(ts);

        CREATE TABLE IF NOT EXISTS series_chain_latest (
            ts TEXT NOT NULL,
            series TEXT NOT NULL,
            W REAL NOT NULL,
            W_proj REAL NOT NULL,
            forcing REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            chain_flag INTEGER NOT NULL,
            top_src TEXT,
            share REAL NOT NULL,
            push REAL NOT NULL,
            push_raw REAL NOT NULL,
            base_push REAL NOT NULL,
            boosted_push REAL NOT NULL,
            delta_boost REAL NOT NULL,
            domains INTEGER NOT NULL,
            L3_domains INTEGER NOT NULL,
            max_event_level TEXT NOT NULL DEFAULT 'L1',
            geo_factor REAL NOT NULL DEFAULT 0,
            tw_rank_score REAL NOT NULL DEFAULT 0,
            geo_explain_json TEXT NOT NULL DEFAULT 'null',
            PRIMARY KEY (ts, series)
        );

        CREATE VIEW IF NOT EXISTS v_domain_latest AS
            SELECT a.ts, a.domain, a.series, a.heat, a.A, a.D, a.Hstar, a.W, a.level_max
            FROM anomaly_records a
            JOIN (SELECT domain, MAX(ts) AS ts FROM anomaly_records GROUP BY domain) m
              ON a.domain = m.domain AND a.ts = m.ts;

        CREATE VIEW IF NOT EXISTS v_series_latest AS
            SELECT ts, series,
                   AVG(W) AS W_avg,
                   COUNT(DISTINCT domain) AS domains,
                   SUM(CASE WHEN level_max = 'L3' THEN 1 ELSE 0 END) AS L3_domains
            FROM anomaly_records
            WHERE ts = (SELECT MAX(ts) FROM anomaly_records)
            GROUP BY ts, series;",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    Ok(())
}
