//! End-to-end HTTP-level scenarios against the real router (§8).
//!
//! These drive `build_router` with `tower::ServiceExt::oneshot` the way the
//! teacher's own router tests do, rather than calling handler functions
//! directly — `connect_in_memory` is `#[cfg(test)]`-gated inside the `tenantd`
//! lib and unreachable from here, so each test gets its own tempfile-backed
//! database via `tenantd::db::connect`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine;
use hmac::{Hmac, Mac};
use rusqlite::params;
use sha2::Sha256;
use tower::ServiceExt;

use tenantd::adapters::shopify::ShopifyAdapter;
use tenantd::api::{build_router, AppState};
use tenantd::auth::JwtHandler;
use tenantd::config::Config;
use tenantd::middleware::rate_limit::ConnectionRateLimiter;
use tenantd::queue::handlers::AdapterRegistry;
use tenantd::sourceref::blob_store::LocalFsBlobStore;

const CLIENT_SECRET: &str = "shpss_test_secret";

fn test_config() -> Config {
    Config {
        database_path: ":memory:".to_string(),
        port: 0,
        blob_root: "/tmp".to_string(),
        app_base_url: "https://tenantd.example.com".to_string(),
        provider_client_id: "id".to_string(),
        provider_client_secret: CLIENT_SECRET.to_string(),
        provider_scopes: vec!["read_products".to_string()],
        ckan_portal_base_url: "https://datos.example.gov".to_string(),
        scheduler_shared_secret: "shared".to_string(),
        jwt_secret: "jwtsecret".to_string(),
        sync_rate_limit_window_secs: 300,
        soft_match_fallback_enabled: false,
    }
}

fn test_state(db_path: &std::path::Path, blob_dir: &std::path::Path) -> AppState {
    let db = tenantd::db::connect(db_path.to_str().unwrap()).unwrap();
    let config = Arc::new(test_config());
    let shopify = Arc::new(ShopifyAdapter::new(
        config.provider_client_id.clone(),
        config.provider_client_secret.clone(),
        config.provider_scopes.clone(),
        config.app_base_url.clone(),
    ));
    AppState {
        db,
        config,
        adapters: Arc::new(AdapterRegistry { adapters: HashMap::new() }),
        blob_store: Arc::new(LocalFsBlobStore::new(blob_dir).unwrap()),
        jwt: Arc::new(JwtHandler::new("jwtsecret".to_string())),
        sync_rate_limiter: ConnectionRateLimiter::new(Duration::from_secs(300)),
        shopify,
    }
}

fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

fn seed_connection(state: &AppState, shop: &str) {
    let conn = state.db.get().unwrap();
    conn.execute("INSERT INTO tenants (id, plan_tier, created_at) VALUES ('t1','free','2026-01-01')", [])
        .unwrap();
    conn.execute(
        "INSERT INTO connections (id, tenant_id, source_domain, token, scopes, sync_status, strike_count, created_at)
         VALUES ('c1', 't1', ?1, 'tok', 'read_products', 'synced', 0, '2026-01-01')",
        params![shop],
    )
    .unwrap();
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected_and_writes_nothing() {
    let db_dir = tempfile::tempdir().unwrap();
    let blob_dir = tempfile::tempdir().unwrap();
    let state = test_state(&db_dir.path().join("test.db"), blob_dir.path());
    seed_connection(&state, "shop.myshopify.com");

    let body = serde_json::json!({"id": "O1"}).to_string();
    let app = build_router(state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/shopify")
                .header("shop-domain", "shop.myshopify.com")
                .header("topic", "orders/create")
                .header("hmac-sha256", "not-a-real-signature")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let conn = state.db.get().unwrap();
    let source_ref_count: i64 = conn.query_row("SELECT COUNT(*) FROM source_refs", [], |r| r.get(0)).unwrap();
    assert_eq!(source_ref_count, 0);

    let (strikes, status): (i64, String) = conn
        .query_row("SELECT strike_count, sync_status FROM connections WHERE id = 'c1'", [], |r| Ok((r.get(0)?, r.get(1)?)))
        .unwrap();
    assert_eq!(strikes, 1);
    assert_eq!(status, "synced");
}

#[tokio::test]
async fn webhook_with_good_signature_is_accepted_and_recorded() {
    let db_dir = tempfile::tempdir().unwrap();
    let blob_dir = tempfile::tempdir().unwrap();
    let state = test_state(&db_dir.path().join("test.db"), blob_dir.path());
    seed_connection(&state, "shop.myshopify.com");

    let body = serde_json::json!({"id": "O1"}).to_string();
    let signature = sign(body.as_bytes(), CLIENT_SECRET);
    let app = build_router(state.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/shopify")
                .header("shop-domain", "shop.myshopify.com")
                .header("topic", "orders/create")
                .header("hmac-sha256", signature)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let conn = state.db.get().unwrap();
    let source_ref_count: i64 = conn.query_row("SELECT COUNT(*) FROM source_refs", [], |r| r.get(0)).unwrap();
    assert_eq!(source_ref_count, 1);

    let job_count: i64 = conn.query_row("SELECT COUNT(*) FROM jobs WHERE job_name = 'Normalize'", [], |r| r.get(0)).unwrap();
    assert_eq!(job_count, 1);
}

#[tokio::test]
async fn second_sync_within_window_is_rate_limited() {
    let db_dir = tempfile::tempdir().unwrap();
    let blob_dir = tempfile::tempdir().unwrap();
    let state = test_state(&db_dir.path().join("test.db"), blob_dir.path());
    seed_connection(&state, "shop.myshopify.com");

    // First call records the hit; a real fetch would fail (no adapter
    // registered) but the rate limiter records on the first attempt
    // regardless of downstream outcome, so the second call still hits 429.
    let app = build_router(state.clone());
    let _ = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/sync")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({"shop": "shop.myshopify.com", "email": "t1"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let app = build_router(state.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/sync")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({"shop": "shop.myshopify.com", "email": "t1"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
    let retry_after = body["retry_after_seconds"].as_u64().unwrap();
    assert!(retry_after > 0, "retry_after_seconds should report the real remaining cooldown, got {retry_after}");
}
