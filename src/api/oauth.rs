//! OAuth connect/callback and inbound change-notification webhook (§4.4).
//!
//! `connect`/`callback` mirror the teacher's redirect-based provider
//! handshake idiom; the inline sync inside `callback` is the one place the
//! repo runs fetch-then-normalize synchronously rather than through the
//! queue, so a failure can set `Connection.status = error` before the
//! redirect is written (§9 Design Notes, "explicit inline critical
//! section").

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect};
use axum::Json;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{OAuthAdapter, RawPayload, SourceAdapter};
use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::hmac_verify;
use crate::models::{Connection, SyncStatus};
use crate::normalize::{self, NormalizeCtx, Normalizer};
use crate::queue::handlers::{complete_ingestion_run, start_ingestion_run};
use crate::sourceref;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub shop: Option<String>,
    pub email: Option<String>,
}

pub async fn connect(State(state): State<AppState>, Query(params): Query<ConnectParams>) -> AppResult<Redirect> {
    let shop = params.shop.ok_or_else(|| AppError::SourceSchema("missing shop".into()))?;
    let email = params.email.ok_or_else(|| AppError::SourceSchema("missing email".into()))?;

    let nonce = Uuid::new_v4();
    let carry = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, email.as_bytes());
    let oauth_state = format!("{nonce}:{carry}");

    Ok(Redirect::to(&state.shopify.build_auth_url(&shop, &oauth_state)))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub shop: Option<String>,
    pub state: Option<String>,
}

pub async fn callback(State(state): State<AppState>, Query(params): Query<CallbackParams>) -> impl IntoResponse {
    match callback_inner(state, params).await {
        Ok(redirect) => redirect,
        Err(code) => Redirect::to(&format!("/legacy/app.html?error={code}")),
    }
}

/// Returns the redirect target on success, or the `?error=<code>` code on
/// failure (§6 "Error codes: missing_params, no_user, auth_failed").
async fn callback_inner(state: AppState, params: CallbackParams) -> Result<Redirect, &'static str> {
    let code = params.code.ok_or("missing_params")?;
    let shop = params.shop.ok_or("missing_params")?;
    let oauth_state = params.state.ok_or("missing_params")?;

    let carry = oauth_state.split_once(':').map(|(_, c)| c).ok_or("missing_params")?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, carry)
        .map_err(|_| "missing_params")?;
    let carry_email = String::from_utf8(decoded).map_err(|_| "missing_params")?;

    let tenant_id = resolve_tenant(&state, &carry_email).ok_or("no_user")?;

    let token = state
        .shopify
        .exchange_code_for_token(&shop, &code)
        .await
        .map_err(|e| {
            warn!(error = %e, "shopify token exchange failed");
            "auth_failed"
        })?;

    let connection = upsert_connection(&state, &tenant_id, &shop, &token).map_err(|e| {
        warn!(error = %e, "failed to persist connection");
        "auth_failed"
    })?;

    if let Err(e) = state
        .shopify
        .register_change_notifications(&connection, &state.config.app_base_url)
        .await
    {
        warn!(error = %e, "failed to register shopify webhooks, continuing anyway");
    }

    match inline_initial_sync(&state, &connection).await {
        Ok((products, orders)) => {
            mark_connection_status(&state, &connection.id, SyncStatus::Synced).ok();
            Ok(Redirect::to(&format!(
                "/legacy/app.html?shopify_connected=true&shop={shop}&products={products}&orders={orders}"
            )))
        }
        Err(e) => {
            warn!(error = %e, "inline initial sync failed");
            mark_connection_status(&state, &connection.id, SyncStatus::Error).ok();
            Err("auth_failed")
        }
    }
}

/// Looks the tenant up by the carried email; falls back to the most
/// recently created tenant on the highest plan when that lookup misses and
/// the operator has opted into the fallback (§9 Open Questions — an
/// observed soft-match with real security implications, gated behind
/// `OAUTH_SOFT_MATCH_FALLBACK` rather than on unconditionally).
fn resolve_tenant(state: &AppState, carry_email: &str) -> Option<String> {
    let conn = state.db.get().ok()?;
    let direct: Option<String> = conn
        .query_row("SELECT id FROM tenants WHERE id = ?1", params![carry_email], |r| r.get(0))
        .optional()
        .ok()?;
    if direct.is_some() {
        return direct;
    }

    if !state.config.soft_match_fallback_enabled {
        return None;
    }

    let mut stmt = conn
        .prepare("SELECT id, plan_tier FROM tenants ORDER BY created_at DESC")
        .ok()?;
    let candidates: Vec<(String, String)> =
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?))).ok()?.collect::<Result<_, _>>().ok()?;

    candidates
        .into_iter()
        .max_by_key(|(_, plan)| crate::models::PlanTier::from_str(plan).rank())
        .map(|(id, _)| {
            warn!(carry_email, tenant_id = %id, "oauth callback soft-matched tenant");
            id
        })
}

fn upsert_connection(state: &AppState, tenant_id: &str, shop: &str, token: &str) -> AppResult<Connection> {
    let conn = state.db.get()?;
    let now = Utc::now().to_rfc3339();
    let scopes = state.config.provider_scopes.join(",");

    conn.execute(
        "INSERT INTO connections (id, tenant_id, source_domain, token, scopes, sync_status, strike_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'syncing', 0, ?6)
         ON CONFLICT(source_domain) DO UPDATE SET token = excluded.token, scopes = excluded.scopes, sync_status = 'syncing'",
        params![shop, tenant_id, shop, token, scopes, now],
    )?;

    let (id, created_at): (String, String) = conn.query_row(
        "SELECT id, created_at FROM connections WHERE source_domain = ?1",
        params![shop],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    Ok(Connection {
        id,
        tenant_id: tenant_id.to_string(),
        source_domain: shop.to_string(),
        token: token.to_string(),
        scopes: state.config.provider_scopes.clone(),
        last_sync: None,
        sync_status: SyncStatus::Syncing,
        strike_count: 0,
        created_at,
    })
}

fn mark_connection_status(state: &AppState, connection_id: &str, status: SyncStatus) -> AppResult<()> {
    let conn = state.db.get()?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE connections SET sync_status = ?1, last_sync = ?2 WHERE id = ?3",
        params![status.as_str(), now, connection_id],
    )?;
    Ok(())
}

/// The explicit inline critical section (§9): fetch and normalize
/// products then orders synchronously, returning the counts the redirect
/// reports. Any failure here is the caller's job to translate into
/// `Connection.status = error`.
async fn inline_initial_sync(state: &AppState, connection: &Connection) -> AppResult<(i64, i64)> {
    let products = inline_fetch_and_normalize(state, connection, "products").await?;
    let orders = inline_fetch_and_normalize(state, connection, "orders").await?;
    Ok((products, orders))
}

async fn inline_fetch_and_normalize(
    state: &AppState,
    connection: &Connection,
    data_type: &str,
) -> AppResult<i64> {
    let run_id = start_ingestion_run(&state.db, &connection.tenant_id, "shopify", data_type)?;

    let raw = match state.shopify.fetch(connection, data_type).await {
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
        &format!("shopify:{data_type}:{}", connection.id),
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
        other => return Err(AppError::SourceSchema(format!("unknown inline-sync data_type {other}"))),
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

/// `POST /webhooks/:provider` (§4.4 "Change-notification verification").
/// HMAC failure is `401`; a missing routing header is `400`; every other
/// path — including an internal error while recording the notification —
/// returns `200` so the provider doesn't retry after the body has already
/// been captured for later reprocessing.
pub async fn webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let shop = match header_str(&headers, "shop-domain") {
        Some(v) => v,
        None => return (StatusCode::BAD_REQUEST, Json(json!({"error": "missing shop-domain header"}))),
    };
    let topic = match header_str(&headers, "topic") {
        Some(v) => v,
        None => return (StatusCode::BAD_REQUEST, Json(json!({"error": "missing topic header"}))),
    };
    let signature = match header_str(&headers, "hmac-sha256") {
        Some(v) => v,
        None => return (StatusCode::BAD_REQUEST, Json(json!({"error": "missing hmac-sha256 header"}))),
    };

    if !hmac_verify::verify(&body, &signature, &state.config.provider_client_secret) {
        bump_strike(&state, &shop).ok();
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Invalid HMAC"})));
    }

    clear_strikes(&state, &shop).ok();

    if let Err(e) = record_webhook(&state, &provider, &shop, &topic, &body) {
        warn!(error = %e, provider, shop, topic, "failed to record webhook notification");
    }

    (StatusCode::OK, Json(json!({"ok": true})))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Three strikes of signature failure marks the connection `error` (§8
/// Boundaries); a successful fetch clears it back to `synced`.
fn bump_strike(state: &AppState, shop: &str) -> AppResult<()> {
    let conn = state.db.get()?;
    conn.execute(
        "UPDATE connections SET strike_count = strike_count + 1 WHERE source_domain = ?1",
        params![shop],
    )?;
    conn.execute(
        "UPDATE connections SET sync_status = 'error' WHERE source_domain = ?1 AND strike_count >= 3",
        params![shop],
    )?;
    Ok(())
}

/// A good signature clears the strike counter (§8 Boundaries).
fn clear_strikes(state: &AppState, shop: &str) -> AppResult<()> {
    let conn = state.db.get()?;
    conn.execute(
        "UPDATE connections SET strike_count = 0,
           sync_status = CASE WHEN sync_status = 'error' THEN 'synced' ELSE sync_status END
         WHERE source_domain = ?1",
        params![shop],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::shopify::ShopifyAdapter;
    use crate::auth::JwtHandler;
    use crate::config::Config;
    use crate::db::connect_in_memory;
    use crate::middleware::rate_limit::ConnectionRateLimiter;
    use crate::queue::handlers::AdapterRegistry;
    use std::collections::HashMap;

    fn test_config(soft_match: bool) -> Config {
        Config {
            database_path: ":memory:".to_string(),
            port: 0,
            blob_root: "/tmp".to_string(),
            app_base_url: "https://tenantd.example.com".to_string(),
            provider_client_id: "id".to_string(),
            provider_client_secret: "secret".to_string(),
            provider_scopes: vec!["read_products".to_string()],
            ckan_portal_base_url: "https://datos.example.gov".to_string(),
            scheduler_shared_secret: "shared".to_string(),
            jwt_secret: "jwtsecret".to_string(),
            sync_rate_limit_window_secs: 300,
            soft_match_fallback_enabled: soft_match,
        }
    }

    fn test_state(soft_match: bool) -> AppState {
        let db = connect_in_memory().unwrap();
        let config = Arc::new(test_config(soft_match));
        let shopify = Arc::new(ShopifyAdapter::new(
            config.provider_client_id.clone(),
            config.provider_client_secret.clone(),
            config.provider_scopes.clone(),
            config.app_base_url.clone(),
        ));
        let adapters = Arc::new(AdapterRegistry { adapters: HashMap::new() });
        AppState {
            db,
            config,
            adapters,
            blob_store: Arc::new(crate::sourceref::blob_store::LocalFsBlobStore::new(std::env::temp_dir()).unwrap()),
            jwt: Arc::new(JwtHandler::new("jwtsecret".to_string())),
            sync_rate_limiter: ConnectionRateLimiter::new(std::time::Duration::from_secs(300)),
            shopify,
        }
    }

    fn insert_tenant(state: &AppState, id: &str, plan: &str, created_at: &str) {
        state
            .db
            .get()
            .unwrap()
            .execute("INSERT INTO tenants (id, plan_tier, created_at) VALUES (?1, ?2, ?3)", params![id, plan, created_at])
            .unwrap();
    }

    #[test]
    fn resolve_tenant_prefers_direct_match() {
        let state = test_state(true);
        insert_tenant(&state, "alice@example.com", "free", "2026-01-01");
        insert_tenant(&state, "bob@example.com", "enterprise", "2026-01-02");

        assert_eq!(resolve_tenant(&state, "alice@example.com"), Some("alice@example.com".to_string()));
    }

    #[test]
    fn resolve_tenant_soft_matches_only_when_enabled() {
        let disabled = test_state(false);
        insert_tenant(&disabled, "bob@example.com", "enterprise", "2026-01-02");
        assert_eq!(resolve_tenant(&disabled, "nobody@example.com"), None);

        let enabled = test_state(true);
        insert_tenant(&enabled, "carol@example.com", "free", "2026-01-01");
        insert_tenant(&enabled, "dave@example.com", "enterprise", "2026-01-02");
        assert_eq!(resolve_tenant(&enabled, "nobody@example.com"), Some("dave@example.com".to_string()));
    }

    #[test]
    fn three_strikes_marks_connection_error_and_good_signature_clears_it() {
        let state = test_state(false);
        insert_tenant(&state, "tenant1", "free", "2026-01-01");
        state
            .db
            .get()
            .unwrap()
            .execute(
                "INSERT INTO connections (id, tenant_id, source_domain, token, scopes, sync_status, strike_count, created_at)
                 VALUES ('c1', 'tenant1', 'shop.myshopify.com', 'tok', 'read_products', 'synced', 0, '2026-01-01')",
                [],
            )
            .unwrap();

        for _ in 0..3 {
            bump_strike(&state, "shop.myshopify.com").unwrap();
        }

        let conn = state.db.get().unwrap();
        let (status, strikes): (String, i64) = conn
            .query_row("SELECT sync_status, strike_count FROM connections WHERE id = 'c1'", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(status, "error");
        assert_eq!(strikes, 3);
        drop(conn);

        clear_strikes(&state, "shop.myshopify.com").unwrap();
        let conn = state.db.get().unwrap();
        let (status, strikes): (String, i64) = conn
            .query_row("SELECT sync_status, strike_count FROM connections WHERE id = 'c1'", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap();
        assert_eq!(status, "synced");
        assert_eq!(strikes, 0);
    }
}

fn record_webhook(state: &AppState, provider: &str, shop: &str, topic: &str, body: &[u8]) -> AppResult<()> {
    let conn = state.db.get()?;
    let (connection_id, tenant_id): (String, String) = conn.query_row(
        "SELECT id, tenant_id FROM connections WHERE source_domain = ?1",
        params![shop],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    drop(conn);

    let data_type = match topic {
        "products/update" => "products",
        "orders/create" | "orders/updated" => "orders",
        other => {
            info!(topic = other, "unrouted webhook topic, recording without normalize follow-up");
            "unknown"
        }
    };

    let payload: serde_json::Value = serde_json::from_slice(body)?;
    let run_id = start_ingestion_run(&state.db, &tenant_id, provider, data_type)?;
    let blob_location = state.blob_store.put(data_type, body)?;
    let (source_ref, is_new) = sourceref::record_fetch(
        &state.db,
        &tenant_id,
        &format!("{provider}:webhook:{connection_id}:{topic}"),
        data_type,
        &payload,
        &blob_location,
        run_id,
    )?;

    if !is_new {
        complete_ingestion_run(&state.db, run_id, "completed", 0, 1, 0, None)?;
        return Ok(());
    }

    if data_type != "unknown" {
        crate::queue::store::enqueue(
            &state.db,
            crate::queue::store::QueueName::Normalize,
            "Normalize",
            &serde_json::json!({
                "source_ref_id": source_ref.id,
                "tenant_id": tenant_id,
                "data_type": data_type,
                "payload": payload,
            }),
            crate::queue::store::EnqueueOptions { tenant_id: Some(tenant_id), ..Default::default() },
        )?;
    }

    complete_ingestion_run(&state.db, run_id, "completed", 1, 0, 0, None)?;
    Ok(())
}
