//! Source Adapters (C4, §4.4)
//! Mission: per-source fetch drivers behind one uniform contract.

pub mod ckan;
pub mod shopify;

use crate::error::AppResult;
use crate::models::Connection;
use async_trait::async_trait;

/// What an adapter hands back from one `fetch` call — an opaque JSON blob
/// plus the declared `data_type`, not yet parsed into typed rows. Parsing
/// and upserting is the normaliser's job (§4.5).
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub data_type: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn fetch(&self, connection: &Connection, data_type: &str) -> AppResult<RawPayload>;

    /// Register for provider-initiated change notifications. Returns the
    /// list of registered topics (empty if the source has none).
    async fn register_change_notifications(
        &self,
        connection: &Connection,
        callback_base: &str,
    ) -> AppResult<Vec<String>>;
}

/// OAuth-protected sources additionally expose the authorization-code
/// handshake (§4.4 "OAuth flow").
#[async_trait]
pub trait OAuthAdapter: SourceAdapter {
    fn build_auth_url(&self, shop: &str, state: &str) -> String;

    async fn exchange_code_for_token(&self, shop: &str, code: &str) -> AppResult<String>;
}
