//! Shopify adapter (commerce vertical, §4.4 "OAuth flow").
//!
//! The rate limiter and retry loop are adapted from the teacher's
//! `scrapers/polymarket_api.rs` (`RateLimiter`, `execute_with_retry`); the
//! OAuth handshake itself has no teacher analogue and is built fresh from
//! the standard authorization-code pattern.

use super::{OAuthAdapter, RawPayload, SourceAdapter};
use crate::error::{AppError, AppResult};
use crate::models::Connection;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 200;

pub struct ShopifyAdapter {
    client: Client,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    redirect_uri: String,
}

impl ShopifyAdapter {
    pub fn new(client_id: String, client_secret: String, scopes: Vec<String>, app_base_url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("tenantd/0.1 (+source-adapter)")
            .build()
            .expect("tls backend is available");
        let redirect_uri = format!("{}/callback", app_base_url.trim_end_matches('/'));
        Self { client, client_id, client_secret, scopes, redirect_uri }
    }

    async fn execute_with_retry(
        &self,
        request: reqwest::RequestBuilder,
    ) -> AppResult<reqwest::Response> {
        let mut backoff = INITIAL_BACKOFF_MS;

        for attempt in 0..MAX_RETRIES {
            let Some(cloned) = request.try_clone() else {
                return Err(AppError::Internal("request body not cloneable for retry".into()));
            };

            match timeout(Duration::from_secs(15), cloned.send()).await {
                Ok(Ok(response)) => {
                    if response.status().is_success() {
                        return Ok(response);
                    } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(2);
                        warn!(attempt, retry_after, "shopify rate limited, backing off");
                        sleep(Duration::from_secs(retry_after)).await;
                    } else {
                        let status = response.status();
                        let text = response.text().await.unwrap_or_default();
                        return Err(AppError::SourceSchema(format!(
                            "shopify api error {status}: {text}"
                        )));
                    }
                }
                Ok(Err(e)) => warn!(attempt, error = %e, "shopify request failed"),
                Err(_) => warn!(attempt, "shopify request timed out"),
            }

            if attempt < MAX_RETRIES - 1 {
                debug!(backoff_ms = backoff, "retrying shopify request");
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(10_000);
            }
        }

        Err(AppError::TransientIo("max retries exceeded for shopify request".into()))
    }
}

#[async_trait]
impl SourceAdapter for ShopifyAdapter {
    fn source_name(&self) -> &'static str {
        "shopify"
    }

    async fn fetch(&self, connection: &Connection, data_type: &str) -> AppResult<RawPayload> {
        let shop = &connection.source_domain;
        let path = match data_type {
            "products" => "products.json?limit=250",
            "orders" => "orders.json?status=any&limit=250",
            other => {
                return Err(AppError::SourceSchema(format!("unknown shopify data_type {other}")))
            }
        };
        let url = format!("https://{shop}/admin/api/2024-01/{path}");

        let request = self
            .client
            .get(&url)
            .header("X-Shopify-Access-Token", &connection.token);

        let response = self.execute_with_retry(request).await?;
        let payload: serde_json::Value = response.json().await?;

        Ok(RawPayload { data_type: data_type.to_string(), payload })
    }

    async fn register_change_notifications(
        &self,
        connection: &Connection,
        callback_base: &str,
    ) -> AppResult<Vec<String>> {
        let shop = &connection.source_domain;
        let topics = ["products/update", "orders/create", "orders/updated"];
        let mut registered = Vec::new();

        for topic in topics {
            let body = serde_json::json!({
                "webhook": {
                    "topic": topic,
                    "address": format!("{callback_base}/webhooks/shopify"),
                    "format": "json",
                }
            });
            let request = self
                .client
                .post(format!("https://{shop}/admin/api/2024-01/webhooks.json"))
                .header("X-Shopify-Access-Token", &connection.token)
                .json(&body);

            self.execute_with_retry(request).await?;
            registered.push(topic.to_string());
        }

        Ok(registered)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[async_trait]
impl OAuthAdapter for ShopifyAdapter {
    fn build_auth_url(&self, shop: &str, state: &str) -> String {
        format!(
            "https://{shop}/admin/oauth/authorize?client_id={}&scope={}&redirect_uri={}&state={}",
            self.client_id,
            self.scopes.join(","),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code_for_token(&self, shop: &str, code: &str) -> AppResult<String> {
        let body = serde_json::json!({
            "client_id": self.client_id,
            "client_secret": self.client_secret,
            "code": code,
        });

        let response = self
            .client
            .post(format!("https://{shop}/admin/oauth/access_token"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!("token exchange failed ({status}): {text}")));
        }

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}
