//! Database pool and schema management
//! Mission: one shared mutable store, row-level upsert, no app-level locks

mod schema;

use crate::error::AppResult;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Build a pooled connection to the SQLite store and apply the schema.
///
/// WAL mode lets workers and API handlers read concurrently while a writer
/// holds the write lock, matching the teacher's `signals/db_storage.rs`
/// pragmas.
pub fn connect(database_path: &str) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
    });
    let pool = Pool::builder()
        .max_size(16)
        .build(manager)
        .map_err(|e| crate::error::AppError::Config(format!("failed to open database: {e}")))?;

    let conn = pool.get()?;
    schema::apply(&conn)?;
    Ok(pool)
}

/// In-memory pool for tests — every connection in the pool shares the same
/// named in-memory database so pooled handles see the same data.
#[cfg(test)]
pub fn connect_in_memory() -> AppResult<DbPool> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let uri = format!("file:tenantd_test_{n}?mode=memory&cache=shared");
    let manager = SqliteConnectionManager::file(&uri).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| crate::error::AppError::Internal(e.to_string()))?;
    let conn = pool.get()?;
    schema::apply(&conn)?;
    Ok(pool)
}
