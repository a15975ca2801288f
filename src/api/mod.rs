//! API Surface (C7, §6 "External Interfaces").
//! `build_router(AppState) -> Router`, one handler function per endpoint —
//! matching the teacher's explicit-function-per-route style, not
//! macro/derive-based routing.

pub mod oauth;
pub mod routes_commerce;
pub mod routes_common;
pub mod routes_legislative;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::adapters::shopify::ShopifyAdapter;
use crate::auth::JwtHandler;
use crate::config::Config;
use crate::db::DbPool;
use crate::middleware::rate_limit::ConnectionRateLimiter;
use crate::middleware::tenant_guard;
use crate::queue::handlers::AdapterRegistry;
use crate::sourceref::blob_store::BlobStore;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub adapters: Arc<AdapterRegistry>,
    pub blob_store: Arc<dyn BlobStore>,
    pub jwt: Arc<JwtHandler>,
    pub sync_rate_limiter: ConnectionRateLimiter,
    /// `AdapterRegistry` erases to `dyn SourceAdapter` for the queue
    /// handlers; the OAuth routes need the concrete `OAuthAdapter` methods
    /// (`build_auth_url`, `exchange_code_for_token`), so the commerce
    /// vertical's adapter is kept twice over, once under each shape.
    pub shopify: Arc<ShopifyAdapter>,
}

/// Routes that authenticate themselves a different way (OAuth handshake,
/// webhook HMAC, or issuing the very token the guard below checks) stay
/// outside `enforce_tenant_auth`; every other tenant-scoped route is
/// wrapped in it so a handler can only ever see a cryptographically
/// verified tenant id.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/connect", get(oauth::connect))
        .route("/callback", get(oauth::callback))
        .route("/webhooks/:provider", post(oauth::webhook))
        .route("/api/v1/auth/identity", post(routes_common::auth_identity))
        .route("/api/v1/sync", post(routes_commerce::sync))
        .route("/api/v1/analyze", post(routes_commerce::analyze));

    let protected = Router::new()
        .route("/api/v1/legislators", get(routes_legislative::list_legislators))
        .route("/api/v1/legislators/:id", get(routes_legislative::get_legislator))
        .route("/api/v1/legislators/:id/metrics", get(routes_legislative::get_legislator_metrics))
        .route("/api/v1/legislators/:id/activity", get(routes_legislative::get_legislator_activity))
        .route("/api/v1/bills", get(routes_legislative::list_bills))
        .route("/api/v1/bills/:id", get(routes_legislative::get_bill))
        .route("/api/v1/feed", get(routes_common::list_feed))
        .route("/api/v1/feed/:id", get(routes_common::get_feed_post))
        .route("/api/v1/reindex", post(routes_common::reindex))
        .layer(axum::middleware::from_fn_with_state(state.clone(), tenant_guard::enforce_tenant_auth));

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
