//! Application configuration
//! Mission: one place that reads the environment; no hidden globals

use crate::error::{AppError, AppResult};

/// Everything the service needs to start. Constructed once in `main` and
/// threaded through `AppState` — nothing here is a lazily-initialised
/// singleton.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,
    pub blob_root: String,
    pub app_base_url: String,

    pub provider_client_id: String,
    pub provider_client_secret: String,
    pub provider_scopes: Vec<String>,

    /// Base URL of the CKAN portal the legislative vertical polls.
    pub ckan_portal_base_url: String,

    pub scheduler_shared_secret: String,
    pub jwt_secret: String,

    pub sync_rate_limit_window_secs: u64,
    pub soft_match_fallback_enabled: bool,
}

impl Config {
    /// Load configuration from the environment. Absence of any required
    /// name is a startup fatal (`ConfigError`, exit code 1 — see §6).
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "./tenantd.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| AppError::Config("PORT must be a valid u16".into()))?;

        let blob_root =
            std::env::var("BLOB_ROOT").unwrap_or_else(|_| "./storage/raw".to_string());

        let app_base_url = Self::require("APP_BASE_URL")?;

        let provider_client_id = Self::require("PROVIDER_CLIENT_ID")?;
        let provider_client_secret = Self::require("PROVIDER_CLIENT_SECRET")?;
        let provider_scopes = Self::require("PROVIDER_SCOPES")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let ckan_portal_base_url =
            std::env::var("CKAN_PORTAL_BASE_URL").unwrap_or_else(|_| "https://datos.example.gov".to_string());

        let scheduler_shared_secret = Self::require("SCHEDULER_SHARED_SECRET")?;
        let jwt_secret = Self::require("JWT_SECRET")?;

        let sync_rate_limit_window_secs = std::env::var("SYNC_RATE_LIMIT_WINDOW_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .unwrap_or(300);

        let soft_match_fallback_enabled = std::env::var("OAUTH_SOFT_MATCH_FALLBACK")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on"))
            .unwrap_or(false);

        Ok(Self {
            database_path,
            port,
            blob_root,
            app_base_url,
            provider_client_id,
            provider_client_secret,
            provider_scopes,
            ckan_portal_base_url,
            scheduler_shared_secret,
            jwt_secret,
            sync_rate_limit_window_secs,
            soft_match_fallback_enabled,
        })
    }

    fn require(name: &str) -> AppResult<String> {
        std::env::var(name)
            .map_err(|_| AppError::Config(format!("missing required env var {name}")))
    }
}
