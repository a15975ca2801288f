//! Source-Ref Store (C1, §4.1)
//! Mission: deduplicate raw fetches by checksum; persist blob location and
//! fetch timestamp for audit.

pub mod blob_store;

use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::SourceRef;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

pub use blob_store::{BlobStore, LocalFsBlobStore};

/// SHA-256 over the canonical serialisation of the payload. `serde_json`
/// with the `preserve_order` feature disabled for this call would still
/// depend on map insertion order, so canonicalisation sorts object keys
/// recursively before hashing.
pub fn checksum(payload: &serde_json::Value) -> String {
    let canonical = canonicalize(payload);
    let bytes = serde_json::to_vec(&canonical).expect("canonical value always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), canonicalize(v));
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Atomically checks the most recent SourceRef for `(source_key,
/// checksum)`; returns the existing row with `is_new = false` if found,
/// otherwise inserts and returns `is_new = true` (§4.1).
pub fn record_fetch(
    pool: &DbPool,
    tenant_id: &str,
    source_key: &str,
    data_type: &str,
    payload: &serde_json::Value,
    blob_location: &str,
    ingestion_run_id: i64,
) -> AppResult<(SourceRef, bool)> {
    let conn = pool.get()?;
    let sum = checksum(payload);

    let existing = conn
        .query_row(
            "SELECT id, tenant_id, source_key, data_type, checksum, blob_location, fetched_at, ingestion_run_id, status
             FROM source_refs
             WHERE tenant_id = ?1 AND source_key = ?2 AND checksum = ?3
             ORDER BY id DESC LIMIT 1",
            params![tenant_id, source_key, sum],
            row_to_sourceref,
        )
        .optional()?;

    if let Some(row) = existing {
        return Ok((row, false));
    }

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO source_refs (tenant_id, source_key, data_type, checksum, blob_location, fetched_at, ingestion_run_id, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'ok')",
        params![tenant_id, source_key, data_type, sum, blob_location, now, ingestion_run_id],
    )?;
    let id = conn.last_insert_rowid();

    let row = conn.query_row(
        "SELECT id, tenant_id, source_key, data_type, checksum, blob_location, fetched_at, ingestion_run_id, status
         FROM source_refs WHERE id = ?1",
        params![id],
        row_to_sourceref,
    )?;
    Ok((row, true))
}

pub fn mark_error(pool: &DbPool, source_ref_id: i64) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE source_refs SET status = 'error' WHERE id = ?1",
        params![source_ref_id],
    )?;
    Ok(())
}

fn row_to_sourceref(row: &rusqlite::Row) -> rusqlite::Result<SourceRef> {
    Ok(SourceRef {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        source_key: row.get(2)?,
        data_type: row.get(3)?,
        checksum: row.get(4)?,
        blob_location: row.get(5)?,
        fetched_at: row.get(6)?,
        ingestion_run_id: row.get(7)?,
        status: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    fn setup_tenant_and_run(pool: &DbPool) -> i64 {
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO tenants (id, plan_tier, created_at) VALUES ('t1', 'free', '2026-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO ingestion_runs (tenant_id, source_name, data_type, started_at, status) VALUES ('t1', 'shopify', 'products', '2026-01-01', 'running')",
            [],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn duplicate_checksum_is_not_new() {
        let pool = connect_in_memory().unwrap();
        let run_id = setup_tenant_and_run(&pool);
        let payload = serde_json::json!({"a": 1, "b": 2});

        let (first, is_new1) =
            record_fetch(&pool, "t1", "shopify:products", "products", &payload, "blob://1", run_id).unwrap();
        assert!(is_new1);

        let (second, is_new2) =
            record_fetch(&pool, "t1", "shopify:products", "products", &payload, "blob://2", run_id).unwrap();
        assert!(!is_new2);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn key_order_does_not_change_checksum() {
        let a = serde_json::json!({"a": 1, "b": 2});
        let b = serde_json::json!({"b": 2, "a": 1});
        assert_eq!(checksum(&a), checksum(&b));
    }
}
