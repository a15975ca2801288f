//! SQLite-backed queue storage.
//!
//! Grounded on the teacher's `middleware/rate_limit.rs` state-tracking
//! shape (a small struct guarding shared state, checked and updated under
//! one lock) but persisted so jobs survive a restart, per §4.2 "Durable".

use crate::error::{AppError, AppResult};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueName {
    Ingest,
    Normalize,
    Metrics,
    Feed,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Ingest => "ingest",
            QueueName::Normalize => "normalize",
            QueueName::Metrics => "metrics",
            QueueName::Feed => "feed",
        }
    }

    /// Per-queue soft deadline (§5).
    pub fn soft_deadline(&self) -> std::time::Duration {
        match self {
            QueueName::Ingest => std::time::Duration::from_secs(5 * 60),
            QueueName::Normalize => std::time::Duration::from_secs(30),
            QueueName::Metrics => std::time::Duration::from_secs(60),
            QueueName::Feed => std::time::Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub attempts: u32,
    pub backoff_seed_ms: u64,
    /// Dedup key scoped to the queue. A second enqueue with the same key
    /// while a pending/running job exists is a no-op (§4.5 "deduplicated").
    pub dedup_key: Option<String>,
    pub tenant_id: Option<String>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_seed_ms: 30_000,
            dedup_key: None,
            tenant_id: None,
        }
    }
}

pub struct ClaimedJob {
    pub id: i64,
    pub job_name: String,
    pub payload: serde_json::Value,
    pub tenant_id: Option<String>,
    pub attempts_remaining: i64,
    pub backoff_seed_ms: i64,
}

pub fn enqueue(
    pool: &DbPool,
    queue: QueueName,
    job_name: &str,
    payload: &serde_json::Value,
    options: EnqueueOptions,
) -> AppResult<i64> {
    let conn = pool.get()?;
    let now = Utc::now().to_rfc3339();
    let payload_json = serde_json::to_string(payload)?;

    if let Some(key) = &options.dedup_key {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM jobs WHERE queue = ?1 AND dedup_key = ?2 AND status IN ('pending','running')",
                params![queue.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
    }

    conn.execute(
        "INSERT INTO jobs (queue, job_name, payload_json, dedup_key, tenant_id, status, attempts_remaining, backoff_seed_ms, run_after, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8, ?8)
         ON CONFLICT(queue, dedup_key) DO NOTHING",
        params![
            queue.as_str(),
            job_name,
            payload_json,
            options.dedup_key,
            options.tenant_id,
            options.attempts as i64,
            options.backoff_seed_ms as i64,
            now,
        ],
    )?;

    let id: i64 = conn.query_row(
        "SELECT id FROM jobs WHERE queue = ?1 AND job_name = ?2 AND payload_json = ?3 ORDER BY id DESC LIMIT 1",
        params![queue.as_str(), job_name, payload_json],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Atomically claim the oldest due job on `queue`. SQLite serializes
/// writers, so this single `UPDATE ... RETURNING` is the whole "lease".
pub fn claim_next(pool: &DbPool, queue: QueueName) -> AppResult<Option<ClaimedJob>> {
    let conn = pool.get()?;
    let now = Utc::now().to_rfc3339();

    let candidate: Option<i64> = conn
        .query_row(
            "SELECT id FROM jobs
             WHERE queue = ?1 AND status = 'pending' AND run_after <= ?2
             ORDER BY id ASC LIMIT 1",
            params![queue.as_str(), now],
            |row| row.get(0),
        )
        .optional()?;

    let Some(id) = candidate else { return Ok(None) };

    let updated = conn.execute(
        "UPDATE jobs SET status = 'running' WHERE id = ?1 AND status = 'pending'",
        params![id],
    )?;
    if updated == 0 {
        // Lost the race to another worker.
        return Ok(None);
    }

    let job = conn.query_row(
        "SELECT id, job_name, payload_json, tenant_id, attempts_remaining, backoff_seed_ms FROM jobs WHERE id = ?1",
        params![id],
        |row| {
            let payload_json: String = row.get(2)?;
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                payload_json,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        },
    )?;

    let payload: serde_json::Value = serde_json::from_str(&job.2)?;
    Ok(Some(ClaimedJob {
        id: job.0,
        job_name: job.1,
        payload,
        tenant_id: job.3,
        attempts_remaining: job.4,
        backoff_seed_ms: job.5,
    }))
}

pub fn mark_complete(pool: &DbPool, job_id: i64) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE jobs SET status = 'completed' WHERE id = ?1",
        params![job_id],
    )?;
    Ok(())
}

/// Retry with exponential backoff; once `attempts_remaining` hits zero the
/// job moves to the dead-letter status (§4.2).
pub fn mark_failed(pool: &DbPool, job: &ClaimedJob, retryable: bool) -> AppResult<()> {
    let conn = pool.get()?;
    if !retryable || job.attempts_remaining <= 1 {
        conn.execute(
            "UPDATE jobs SET status = 'dead', attempts_remaining = 0 WHERE id = ?1",
            params![job.id],
        )?;
        return Ok(());
    }

    let remaining = job.attempts_remaining - 1;
    let backoff_ms = job.backoff_seed_ms * 2i64.pow((job.attempts_remaining.max(1) - remaining.max(1)) as u32).max(1);
    let run_after = Utc::now() + chrono::Duration::milliseconds(backoff_ms);

    conn.execute(
        "UPDATE jobs SET status = 'pending', attempts_remaining = ?1, run_after = ?2 WHERE id = ?3",
        params![remaining, run_after.to_rfc3339(), job.id],
    )?;
    Ok(())
}

/// Return a job a worker couldn't finish within its soft deadline back to
/// `pending` for retry — cooperative stop, no forced kill (§5).
pub fn return_to_pending(pool: &DbPool, job_id: i64) -> AppResult<()> {
    let conn = pool.get()?;
    conn.execute(
        "UPDATE jobs SET status = 'pending' WHERE id = ?1 AND status = 'running'",
        params![job_id],
    )?;
    Ok(())
}

pub fn count_dead_letter(pool: &DbPool, queue: QueueName) -> AppResult<i64> {
    let conn = pool.get()?;
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE queue = ?1 AND status = 'dead'",
        params![queue.as_str()],
        |row| row.get(0),
    )?;
    Ok(n)
}

pub fn queue_connectivity_check(pool: &DbPool) -> AppResult<()> {
    let conn = pool.get().map_err(|e| AppError::TransientIo(e.to_string()))?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}
