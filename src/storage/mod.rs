//! SQLite storage layer -- schema, repositories, migrations.

pub mod repo;
pub mod schema;

use std::path::Path;

use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tracing::debug;

pub use self::repo::{AnomalyRepo, ChainRepo, EventRepo, SnapshotRepo};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA temp_store = MEMORY;
     PRAGMA mmap_size = 30000000000;
     PRAGMA foreign_keys = ON;
     PRAGMA busy_timeout = 5000;";

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| c.execute_batch(PRAGMAS));

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;
    debug!(path = %path.display(), "storage opened");

    Ok(pool)
}

/// Run store: one SQLite database holding every stage's tables.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            pool: open_pool(path)?,
        })
    }

    /// Private in-memory database. The pool holds a single connection since
    /// every in-memory connection is its own database.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|c| c.execute_batch(PRAGMAS));
        let pool = R2D2Pool::builder().max_size(1).build(manager)?;
        schema::migrate(&*pool.get()?)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}
