//! Commerce vertical routes: user-triggered sync and on-demand analysis
//! (§6, §4.6.2).

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

use crate::adapters::{RawPayload, SourceAdapter};
use crate::api::AppState;
use crate::derive::analysis::{run_analysis, TenantCostParams};
use crate::error::{AppError, AppResult};
use crate::feed;
use crate::models::{Connection, SyncStatus};
use crate::normalize::{self, NormalizeCtx, Normalizer};
use crate::queue::handlers::{complete_ingestion_run, start_ingestion_run};
use crate::sourceref;

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub shop: String,
    pub email: String,
}

/// `POST /sync` (§6, §8 Scenario 5): one sync per 5 minutes per
/// Connection. A hit within the window is `429`; otherwise runs the same
/// inline fetch-then-normalize critical section the OAuth callback uses.
pub async fn sync(State(state): State<AppState>, Json(body): Json<SyncRequest>) -> AppResult<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    let (connection_id, tenant_id, last_sync): (String, String, Option<String>) = conn
        .query_row(
            "SELECT id, tenant_id, last_sync FROM connections WHERE source_domain = ?1",
            params![body.shop],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .map_err(|_| AppError::NotFound(format!("no connection for shop {}", body.shop)))?;
    drop(conn);

    if tenant_id != body.email {
        return Err(AppError::Forbidden("connection does not belong to this tenant".into()));
    }

    match state.sync_rate_limiter.check_and_record(&connection_id) {
        crate::middleware::rate_limit::RateLimitCheck::Exceeded { retry_after } => {
            return Err(AppError::RateLimit { retry_after_secs: retry_after.as_secs(), last_sync });
        }
        crate::middleware::rate_limit::RateLimitCheck::Allowed => {}
    }

    let connection = load_connection(&state, &connection_id, &tenant_id)?;
    let source_name = if connection.source_domain.ends_with(".myshopify.com") { "shopify" } else { "ckan" };
    let adapter = state
        .adapters
        .adapters
        .get(source_name)
        .ok_or_else(|| AppError::Internal(format!("no adapter registered for {source_name}")))?
        .clone();

    let products = inline_fetch_and_normalize(&state, &adapter, &connection, "products").await?;
    let orders = inline_fetch_and_normalize(&state, &adapter, &connection, "orders").await?;

    let now = Utc::now().to_rfc3339();
    let db_conn = state.db.get()?;
    db_conn.execute(
        "UPDATE connections SET last_sync = ?1, sync_status = ?2 WHERE id = ?3",
        params![now, SyncStatus::Synced.as_str(), connection_id],
    )?;

    Ok(Json(json!({
        "last_sync": now,
        "synced": { "products": products, "orders": orders, "inventory": 0 },
    })))
}

fn load_connection(state: &AppState, connection_id: &str, tenant_id: &str) -> AppResult<Connection> {
    let conn = state.db.get()?;
    let (source_domain, token, scopes, sync_status, strike_count, created_at): (
        String,
        String,
        String,
        String,
        i64,
        String,
    ) = conn.query_row(
        "SELECT source_domain, token, scopes, sync_status, strike_count, created_at FROM connections WHERE id = ?1",
        params![connection_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
    )?;

    Ok(Connection {
        id: connection_id.to_string(),
        tenant_id: tenant_id.to_string(),
        source_domain,
        token,
        scopes: scopes.split(',').filter(|s| !s.is_empty()).map(String::from).collect(),
        last_sync: None,
        sync_status: SyncStatus::from_str(&sync_status),
        strike_count,
        created_at,
    })
}

async fn inline_fetch_and_normalize(
    state: &AppState,
    adapter: &std::sync::Arc<dyn SourceAdapter>,
    connection: &Connection,
    data_type: &str,
) -> AppResult<i64> {
    let run_id = start_ingestion_run(&state.db, &connection.tenant_id, adapter.source_name(), data_type)?;

    let raw = match adapter.fetch(connection, data_type).await {
        Ok(raw) => raw,
        Err(e) => {
            complete_ingestion_run(&state.db, run_id, "failed", 0, 0, 1, Some(&e.to_string()))?;
            return Err(e);
        }
    };

    let blob_location = state.blob_store.put(data_type, raw.payload.to_string().as_bytes())?;
    let (source_ref, is_new) = sourceref::record_fetch(
        &state.db,
        &connection.tenant_id,
        &format!("{}:{data_type}:{}", adapter.source_name(), connection.id),
        data_type,
        &raw.payload,
        &blob_location,
        run_id,
    )?;

    if !is_new {
        complete_ingestion_run(&state.db, run_id, "completed", 0, 1, 0, None)?;
        return Ok(0);
    }

    let record_count = match data_type {
        "products" => raw.payload.get("products").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0),
        "orders" => raw.payload.get("orders").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0),
        _ => 0,
    } as i64;

    let normalize_ctx = NormalizeCtx { db: &state.db, tenant_id: &connection.tenant_id, source_ref_id: source_ref.id };
    let raw_for_normalize = RawPayload { data_type: data_type.to_string(), payload: raw.payload };

    let outcome = match data_type {
        "products" => normalize::commerce::ProductNormalizer.normalize(raw_for_normalize, &normalize_ctx),
        "orders" => normalize::commerce::OrderNormalizer.normalize(raw_for_normalize, &normalize_ctx),
        other => return Err(AppError::SourceSchema(format!("unknown sync data_type {other}"))),
    };

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            sourceref::mark_error(&state.db, source_ref.id)?;
            complete_ingestion_run(&state.db, run_id, "failed", 0, 0, 1, Some(&e.to_string()))?;
            return Err(e);
        }
    };

    normalize::enqueue_followups(&state.db, &connection.tenant_id, &outcome)?;
    complete_ingestion_run(&state.db, run_id, "completed", record_count, 0, outcome.errors as i64, None)?;
    Ok(record_count)
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub store_id: String,
    #[allow(dead_code)]
    pub user_id: String,
    #[serde(default)]
    pub modules: Option<Vec<String>>,
    #[serde(default)]
    pub user_costs: Option<TenantCostParams>,
}

/// `POST /analyze` (§4.6.2): runs the four-module analysis, persists one
/// `Analysis` row per applicable module, emits an `ANALYSIS_READY` feed
/// post for the highest-priority applicable module, and returns the bundle.
pub async fn analyze(State(state): State<AppState>, Json(body): Json<AnalyzeRequest>) -> AppResult<Json<serde_json::Value>> {
    let tenant_id = body.store_id;
    let costs = body.user_costs.unwrap_or_default();

    let bundle = run_analysis(&state.db, &tenant_id, &costs)?;
    let requested: Option<Vec<String>> = body.modules;

    let now = Utc::now().to_rfc3339();
    let conn = state.db.get()?;
    let mut best: Option<(i64, &str)> = None;

    for module in &bundle.modules {
        if let Some(wanted) = &requested {
            if !wanted.iter().any(|m| m.eq_ignore_ascii_case(module.module)) {
                continue;
            }
        }
        if !module.applicable {
            continue;
        }

        conn.execute(
            "INSERT INTO analyses (tenant_id, module, input_snapshot, output_snapshot, insight_text, source_tag, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'shopify_auto', ?6)",
            params![
                tenant_id,
                module.module,
                module.inputs.to_string(),
                json!({ "confidence": module.confidence, "priority": format!("{:?}", module.priority).to_lowercase() }).to_string(),
                module.insights,
                now,
            ],
        )?;

        let rank = match module.priority {
            crate::models::analysis::Priority::High => 2,
            crate::models::analysis::Priority::Medium => 1,
            crate::models::analysis::Priority::Low => 0,
        };
        if best.map(|(r, _)| rank > r).unwrap_or(true) {
            best = Some((rank, module.module));
        }
    }

    if let Some((_, module_name)) = best {
        if let Some(m) = bundle.modules.iter().find(|m| m.module == module_name) {
            let analysis_id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM analyses WHERE tenant_id = ?1 AND module = ?2 ORDER BY id DESC LIMIT 1",
                    params![tenant_id, module_name],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(analysis_id) = analysis_id {
                let rendered = feed::render_analysis_ready(module_name, &m.insights, analysis_id);
                feed::persist(&state.db, Some(&tenant_id), &rendered, None, &[])?;
            }
        }
    }
    drop(conn);

    Ok(Json(serde_json::to_value(bundle)?))
}
