//! Error taxonomy
//! Mission: one small enum at every seam instead of throw-based control flow

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Stable error kinds shared by the job runner and the HTTP API.
///
/// Workers retry `TransientIo`; every other kind bubbles out, marks the
/// owning `IngestionRun` failed, and is surfaced on the next scheduled run.
#[derive(Debug)]
pub enum AppError {
    Config(String),
    TransientIo(String),
    SourceSchema(String),
    Auth(String),
    RateLimit { retry_after_secs: u64, last_sync: Option<String> },
    NotFound(String),
    Conflict(String),
    Forbidden(String),
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::TransientIo(_) => "transient_io_error",
            AppError::SourceSchema(_) => "source_schema_error",
            AppError::Auth(_) => "auth_error",
            AppError::RateLimit { .. } => "rate_limited",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Forbidden(_) => "forbidden",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::TransientIo(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SourceSchema(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the job runner should retry this on a queued job.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransientIo(_))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Config(m) => write!(f, "config error: {m}"),
            AppError::TransientIo(m) => write!(f, "transient io error: {m}"),
            AppError::SourceSchema(m) => write!(f, "source schema error: {m}"),
            AppError::Auth(m) => write!(f, "auth error: {m}"),
            AppError::RateLimit { retry_after_secs, .. } => {
                write!(f, "rate limited, retry after {retry_after_secs}s")
            }
            AppError::NotFound(m) => write!(f, "not found: {m}"),
            AppError::Conflict(m) => write!(f, "conflict: {m}"),
            AppError::Forbidden(m) => write!(f, "forbidden: {m}"),
            AppError::Internal(m) => write!(f, "internal error: {m}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl From<r2d2::Error> for AppError {
    fn from(e: r2d2::Error) -> Self {
        AppError::TransientIo(e.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::TransientIo(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::SourceSchema(e.to_string())
    }
}

/// API handlers never surface internal structure; map every kind to a
/// stable string code plus a user-safe message.
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = match &self {
            AppError::RateLimit { retry_after_secs, last_sync } => json!({
                "error": self.code(),
                "message": self.to_string(),
                "retry_after_seconds": retry_after_secs,
                "last_sync": last_sync,
            }),
            _ => json!({
                "error": self.code(),
                "message": self.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
