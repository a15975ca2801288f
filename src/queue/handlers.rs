//! Job handlers binding the queue to the rest of the pipeline (§4.2, §4.5).
//!
//! Four handlers, one per named queue, matching the data-flow sentence in
//! the system overview: Fetch → (skip | Normalize) → Recompute/EmitFeed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use tracing::{info, warn};

use crate::adapters::{RawPayload, SourceAdapter};
use crate::derive::metrics::recompute_legislator_metrics;
use crate::error::{AppError, AppResult};
use crate::feed;
use crate::models::Connection;
use crate::normalize::{self, NormalizeCtx, Normalizer, TransitionPayload};
use crate::queue::job::{JobCtx, JobHandler};
use crate::queue::store::{self, EnqueueOptions, QueueName};
use crate::sourceref::{self, blob_store::BlobStore};

pub struct AdapterRegistry {
    pub adapters: HashMap<&'static str, Arc<dyn SourceAdapter>>,
}

/// `Fetch(source, tenant)` (§2 data flow). Fetches via the registered
/// adapter, dedupes by checksum, and enqueues `Normalize` on anything new.
pub struct FetchHandler {
    pub adapters: Arc<AdapterRegistry>,
    pub blob_store: Arc<dyn BlobStore>,
}

#[async_trait]
impl JobHandler for FetchHandler {
    fn job_name(&self) -> &'static str {
        "Fetch"
    }

    fn deadline(&self) -> Duration {
        QueueName::Ingest.soft_deadline()
    }

    async fn handle(&self, payload: serde_json::Value, ctx: &JobCtx) -> AppResult<()> {
        let connection_id: String = payload
            .get("connection_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::SourceSchema("Fetch job missing connection_id".into()))?
            .to_string();
        let data_type: String = payload
            .get("data_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::SourceSchema("Fetch job missing data_type".into()))?
            .to_string();

        let conn = ctx.db.get()?;
        let (tenant_id, source_domain, token, scopes, sync_status, strike_count, created_at): (
            String,
            String,
            String,
            String,
            String,
            i64,
            String,
        ) = conn.query_row(
            "SELECT tenant_id, source_domain, token, scopes, sync_status, strike_count, created_at FROM connections WHERE id = ?1",
            params![connection_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?, r.get(6)?)),
        )?;
        drop(conn);

        let connection = Connection {
            id: connection_id.clone(),
            tenant_id: tenant_id.clone(),
            source_domain,
            token,
            scopes: scopes.split(',').filter(|s| !s.is_empty()).map(String::from).collect(),
            last_sync: None,
            sync_status: crate::models::SyncStatus::from_str(&sync_status),
            strike_count,
            created_at,
        };

        let source_name = if connection.source_domain.ends_with(".myshopify.com") {
            "shopify"
        } else {
            "ckan"
        };
        let adapter = self
            .adapters
            .adapters
            .get(source_name)
            .ok_or_else(|| AppError::Internal(format!("no adapter registered for {source_name}")))?;

        let run_id = start_ingestion_run(&ctx.db, &tenant_id, source_name, &data_type)?;

        let fetch_result = adapter.fetch(&connection, &data_type).await;
        let raw = match fetch_result {
            Ok(raw) => raw,
            Err(e) => {
                complete_ingestion_run(&ctx.db, run_id, "failed", 0, 0, 1, Some(&e.to_string()))?;
                return Err(e);
            }
        };

        let blob_location = self
            .blob_store
            .put(&data_type, raw.payload.to_string().as_bytes())?;
        let (source_ref, is_new) = sourceref::record_fetch(
            &ctx.db,
            &tenant_id,
            &format!("{source_name}:{data_type}:{connection_id}"),
            &data_type,
            &raw.payload,
            &blob_location,
            run_id,
        )?;

        if !is_new {
            info!(tenant_id = %tenant_id, data_type = %data_type, "fetch unchanged, skipping normalize");
            complete_ingestion_run(&ctx.db, run_id, "completed", 0, 1, 0, None)?;
            return Ok(());
        }

        store::enqueue(
            &ctx.db,
            QueueName::Normalize,
            "Normalize",
            &serde_json::json!({
                "source_ref_id": source_ref.id,
                "tenant_id": tenant_id,
                "data_type": data_type,
                "payload": raw.payload,
            }),
            EnqueueOptions { tenant_id: Some(tenant_id), ..Default::default() },
        )?;

        complete_ingestion_run(&ctx.db, run_id, "completed", 1, 0, 0, None)?;
        Ok(())
    }
}

#[cfg(test)]
mod fetch_handler_tests {
    use super::*;
    use crate::db::connect_in_memory;
    use crate::models::Connection;
    use crate::sourceref::blob_store::LocalFsBlobStore;

    struct FakeAdapter;

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn source_name(&self) -> &'static str {
            "shopify"
        }

        async fn fetch(&self, _connection: &Connection, data_type: &str) -> AppResult<RawPayload> {
            Ok(RawPayload {
                data_type: data_type.to_string(),
                payload: serde_json::json!({"products": [{"id": "P1", "title": "Mug"}]}),
            })
        }

        async fn register_change_notifications(&self, _connection: &Connection, _callback_base: &str) -> AppResult<Vec<String>> {
            Ok(vec![])
        }
    }

    fn seed_connection(conn: &rusqlite::Connection) -> String {
        conn.execute("INSERT INTO tenants (id, plan_tier, created_at) VALUES ('t1','free','2026-01-01')", []).unwrap();
        conn.execute(
            "INSERT INTO connections (id, tenant_id, source_domain, token, scopes, sync_status, strike_count, created_at)
             VALUES ('c1', 't1', 'shop.myshopify.com', 'tok', 'read_products', 'syncing', 0, '2026-01-01')",
            [],
        )
        .unwrap();
        "c1".to_string()
    }

    fn make_handler() -> FetchHandler {
        let mut adapters = HashMap::new();
        adapters.insert("shopify", Arc::new(FakeAdapter) as Arc<dyn SourceAdapter>);
        let blob_dir = tempfile::tempdir().unwrap();
        FetchHandler {
            adapters: Arc::new(AdapterRegistry { adapters }),
            blob_store: Arc::new(LocalFsBlobStore::new(blob_dir.path()).unwrap()),
        }
    }

    #[tokio::test]
    async fn repeat_fetch_of_identical_payload_skips_normalize() {
        let pool = connect_in_memory().unwrap();
        let connection_id = { let conn = pool.get().unwrap(); seed_connection(&conn) };
        let handler = make_handler();
        let ctx = JobCtx { db: pool.clone(), tenant_id: Some("t1".to_string()) };
        let payload = serde_json::json!({"connection_id": connection_id, "data_type": "products"});

        handler.handle(payload.clone(), &ctx).await.unwrap();
        handler.handle(payload, &ctx).await.unwrap();

        let conn = pool.get().unwrap();
        let (run_count, source_ref_count, job_count): (i64, i64, i64) = (
            conn.query_row("SELECT COUNT(*) FROM ingestion_runs", [], |r| r.get(0)).unwrap(),
            conn.query_row("SELECT COUNT(*) FROM source_refs", [], |r| r.get(0)).unwrap(),
            conn.query_row("SELECT COUNT(*) FROM jobs WHERE job_name = 'Normalize'", [], |r| r.get(0)).unwrap(),
        );
        assert_eq!(run_count, 2);
        assert_eq!(source_ref_count, 1);
        assert_eq!(job_count, 1);

        let (skipped, processed): (i64, i64) = conn
            .query_row("SELECT records_skipped, records_processed FROM ingestion_runs ORDER BY id DESC LIMIT 1", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(processed, 0);
    }
}

pub(crate) fn start_ingestion_run(db: &crate::db::DbPool, tenant_id: &str, source_name: &str, data_type: &str) -> AppResult<i64> {
    let conn = db.get()?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO ingestion_runs (tenant_id, source_name, data_type, started_at, status) VALUES (?1, ?2, ?3, ?4, 'running')",
        params![tenant_id, source_name, data_type, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn complete_ingestion_run(
    db: &crate::db::DbPool,
    run_id: i64,
    status: &str,
    processed: i64,
    skipped: i64,
    errored: i64,
    error_detail: Option<&str>,
) -> AppResult<()> {
    let conn = db.get()?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE ingestion_runs SET completed_at = ?1, status = ?2, records_processed = ?3, records_skipped = ?4, records_errored = ?5, error_detail = ?6 WHERE id = ?7",
        params![now, status, processed, skipped, errored, error_detail, run_id],
    )?;
    Ok(())
}

/// `Normalize(source_ref)` (§4.5). Dispatches on `data_type` to the
/// matching `Normalizer` impl, then enqueues the detected follow-ups.
pub struct NormalizeHandler;

#[async_trait]
impl JobHandler for NormalizeHandler {
    fn job_name(&self) -> &'static str {
        "Normalize"
    }

    fn deadline(&self) -> Duration {
        QueueName::Normalize.soft_deadline()
    }

    async fn handle(&self, payload: serde_json::Value, ctx: &JobCtx) -> AppResult<()> {
        let source_ref_id = payload
            .get("source_ref_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| AppError::SourceSchema("Normalize job missing source_ref_id".into()))?;
        let tenant_id = payload
            .get("tenant_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::SourceSchema("Normalize job missing tenant_id".into()))?
            .to_string();
        let data_type = payload
            .get("data_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::SourceSchema("Normalize job missing data_type".into()))?
            .to_string();
        let raw_payload = payload
            .get("payload")
            .cloned()
            .ok_or_else(|| AppError::SourceSchema("Normalize job missing payload".into()))?;

        let normalize_ctx = NormalizeCtx { db: &ctx.db, tenant_id: &tenant_id, source_ref_id };
        let raw = RawPayload { data_type: data_type.clone(), payload: raw_payload };

        let outcome = match data_type.as_str() {
            "products" => normalize::commerce::ProductNormalizer.normalize(raw, &normalize_ctx),
            "orders" => normalize::commerce::OrderNormalizer.normalize(raw, &normalize_ctx),
            "legislators" => normalize::legislative::LegislatorNormalizer.normalize(raw, &normalize_ctx),
            "bills" => normalize::legislative::BillNormalizer.normalize(raw, &normalize_ctx),
            "vote_events" => normalize::legislative::VoteEventNormalizer.normalize(raw, &normalize_ctx),
            "attendance" => normalize::legislative::AttendanceNormalizer.normalize(raw, &normalize_ctx),
            other => {
                sourceref::mark_error(&ctx.db, source_ref_id)?;
                return Err(AppError::SourceSchema(format!("unknown data_type {other}")));
            }
        };

        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                sourceref::mark_error(&ctx.db, source_ref_id)?;
                return Err(e);
            }
        };

        if outcome.errors > 0 {
            warn!(tenant_id = %tenant_id, errors = outcome.errors, "normalize completed with skipped rows");
        }

        normalize::enqueue_followups(&ctx.db, &tenant_id, &outcome)?;
        Ok(())
    }
}

/// `RecomputeMetrics(entity)` (§4.6.1). `entity_key` is
/// `legislator_metrics:<tenant>:<legislator_id>:<period>` — the period comes
/// from the triggering row (a bill's `period`, a vote event's, an
/// attendance record's), never from the clock, so a movement on a past
/// period's bill recomputes that period's row and not the current one.
pub struct RecomputeMetricsHandler;

#[async_trait]
impl JobHandler for RecomputeMetricsHandler {
    fn job_name(&self) -> &'static str {
        "RecomputeMetrics"
    }

    fn deadline(&self) -> Duration {
        QueueName::Metrics.soft_deadline()
    }

    async fn handle(&self, payload: serde_json::Value, ctx: &JobCtx) -> AppResult<()> {
        let entity_key = payload
            .get("entity_key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::SourceSchema("RecomputeMetrics job missing entity_key".into()))?;

        let mut parts = entity_key.split(':');
        match parts.next() {
            Some("legislator_metrics") => {
                let legislator_id: i64 = parts
                    .nth(1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| AppError::SourceSchema("malformed legislator_metrics entity_key".into()))?;
                let period = parts
                    .next()
                    .ok_or_else(|| AppError::SourceSchema("legislator_metrics entity_key missing period".into()))?;
                recompute_legislator_metrics(&ctx.db, legislator_id, period)?;
            }
            Some("analysis") => {
                // Analysis is recomputed inline by `POST /analyze`, not on the
                // metrics queue — this entry exists only to absorb product/
                // order upsert fan-out without dead-lettering it (§4.5 "affected").
            }
            _ => warn!(entity_key, "unrecognised entity_key on metrics queue"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod recompute_metrics_tests {
    use super::*;
    use crate::db::connect_in_memory;
    use rusqlite::OptionalExtension;

    fn seed(conn: &rusqlite::Connection, legislator_id_external: &str, period: &str) -> i64 {
        conn.execute("INSERT OR IGNORE INTO tenants (id, plan_tier, created_at) VALUES ('t1','free','2026-01-01')", []).unwrap();
        conn.execute(
            "INSERT INTO legislators (tenant_id, external_id, first_name, last_name, chamber, term_start) VALUES ('t1', ?1, 'Ada', 'Lovelace', 'lower', '2020-01-01T00:00:00Z')",
            params![legislator_id_external],
        ).unwrap();
        let legislator_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO bills (tenant_id, external_id, title, status, bill_type, presented_date, period) VALUES ('t1', ?1, 'Old bill', 'APPROVED', 'ordinary', '2020-01-01', ?2)",
            params![format!("B-{legislator_id_external}"), period],
        ).unwrap();
        let bill_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO bill_authors (bill_id, legislator_id, role) VALUES (?1, ?2, 'author')",
            params![bill_id, legislator_id],
        ).unwrap();
        legislator_id
    }

    #[tokio::test]
    async fn recomputes_the_period_encoded_in_the_entity_key_not_the_current_year() {
        let pool = connect_in_memory().unwrap();
        let legislator_id = { let conn = pool.get().unwrap(); seed(&conn, "L1", "2020") };
        let ctx = JobCtx { db: pool.clone(), tenant_id: Some("t1".to_string()) };
        let handler = RecomputeMetricsHandler;
        let payload = serde_json::json!({ "entity_key": format!("legislator_metrics:t1:{legislator_id}:2020") });

        handler.handle(payload, &ctx).await.unwrap();

        let conn = pool.get().unwrap();
        let row_2020: Option<i64> = conn
            .query_row(
                "SELECT bills_authored FROM legislator_metrics WHERE legislator_id = ?1 AND period = '2020'",
                params![legislator_id],
                |r| r.get(0),
            )
            .optional()
            .unwrap();
        let row_current: Option<i64> = conn
            .query_row(
                "SELECT bills_authored FROM legislator_metrics WHERE legislator_id = ?1 AND period != '2020'",
                params![legislator_id],
                |r| r.get(0),
            )
            .optional()
            .unwrap();
        assert_eq!(row_2020, Some(1));
        assert_eq!(row_current, None);
    }
}

/// `EmitFeed(event)` (§4.7). Renders and persists one `FeedPost` per
/// detected transition.
pub struct EmitFeedHandler;

#[async_trait]
impl JobHandler for EmitFeedHandler {
    fn job_name(&self) -> &'static str {
        "EmitFeed"
    }

    fn deadline(&self) -> Duration {
        QueueName::Feed.soft_deadline()
    }

    async fn handle(&self, payload: serde_json::Value, ctx: &JobCtx) -> AppResult<()> {
        let transition: TransitionPayload = serde_json::from_value(payload)?;

        let rendered = match transition {
            TransitionPayload::BillCreated { bill_id } => feed::render_bill_created(&ctx.db, bill_id)?,
            TransitionPayload::BillMovement { bill_id, from, to } => {
                feed::render_bill_movement(&ctx.db, bill_id, &from, &to)?
            }
            TransitionPayload::VoteResultRecorded { vote_event_id } => {
                feed::render_vote_result(&ctx.db, vote_event_id)?
            }
            TransitionPayload::AttendanceRecorded { legislator_id, session } => {
                feed::render_attendance_record(&ctx.db, legislator_id, &session)?
            }
            TransitionPayload::OrderCreated { order_id } => {
                let conn = ctx.db.get()?;
                let external_id: String = conn.query_row(
                    "SELECT external_id FROM orders WHERE id = ?1",
                    params![order_id],
                    |r| r.get(0),
                )?;
                feed::RenderedPost {
                    post_type: crate::models::FeedPostType::Created,
                    title: format!("Order {external_id}"),
                    body: "New order received.".to_string(),
                    payload: serde_json::json!({ "order_id": order_id }),
                    entity_type: "order",
                    entity_id: order_id,
                }
            }
        };

        feed::persist(&ctx.db, ctx.tenant_id.as_deref(), &rendered, None, &[])?;
        Ok(())
    }
}
