//! CKAN/CSV adapter (legislative vertical, §4.4 "public CKAN/CSV").
//!
//! Public data, no OAuth, no access token. Polling only — CKAN has no
//! change-notification mechanism, so `register_change_notifications` is a
//! no-op. Retry loop adapted from `scrapers/polymarket_api.rs`.

use super::{RawPayload, SourceAdapter};
use crate::error::{AppError, AppResult};
use crate::models::Connection;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 200;

pub struct CkanAdapter {
    client: Client,
    portal_base_url: String,
}

impl CkanAdapter {
    pub fn new(portal_base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("tenantd/0.1 (+source-adapter)")
            .build()
            .expect("tls backend is available");
        Self { client, portal_base_url }
    }

    async fn execute_with_retry(&self, url: &str) -> AppResult<reqwest::Response> {
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 0..MAX_RETRIES {
            match timeout(Duration::from_secs(15), self.client.get(url).send()).await {
                Ok(Ok(response)) => {
                    if response.status().is_success() {
                        return Ok(response);
                    } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        warn!(attempt, "ckan rate limited, backing off");
                        sleep(Duration::from_millis(backoff * 5)).await;
                    } else {
                        let status = response.status();
                        return Err(AppError::SourceSchema(format!(
                            "ckan api error {status} fetching {url}"
                        )));
                    }
                }
                Ok(Err(e)) => warn!(attempt, error = %e, "ckan request failed"),
                Err(_) => warn!(attempt, "ckan request timed out"),
            }

            if attempt < MAX_RETRIES - 1 {
                debug!(backoff_ms = backoff, "retrying ckan request");
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(10_000);
            }
        }

        Err(AppError::TransientIo(format!("max retries exceeded for {url}")))
    }
}

#[async_trait]
impl SourceAdapter for CkanAdapter {
    fn source_name(&self) -> &'static str {
        "ckan"
    }

    /// `connection.source_domain` holds the CKAN resource id for this
    /// connection; `data_type` selects the dataset slug.
    async fn fetch(&self, connection: &Connection, data_type: &str) -> AppResult<RawPayload> {
        let resource_id = &connection.source_domain;
        let url = format!(
            "{}/api/3/action/datastore_search?resource_id={resource_id}&limit=10000",
            self.portal_base_url
        );

        let response = self.execute_with_retry(&url).await?;
        let envelope: serde_json::Value = response.json().await?;

        let records = envelope
            .get("result")
            .and_then(|r| r.get("records"))
            .cloned()
            .ok_or_else(|| AppError::SourceSchema("ckan response missing result.records".into()))?;

        Ok(RawPayload { data_type: data_type.to_string(), payload: records })
    }

    /// CKAN portals have no webhook/subscription mechanism; this source is
    /// polled on the schedule only (§4.3).
    async fn register_change_notifications(
        &self,
        _connection: &Connection,
        _callback_base: &str,
    ) -> AppResult<Vec<String>> {
        Ok(Vec::new())
    }
}
