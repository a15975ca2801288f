//! IngestionRun — one invocation of one adapter, append-only.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionRun {
    pub id: i64,
    pub tenant_id: String,
    pub source_name: String,
    pub data_type: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: RunStatus,
    pub records_processed: i64,
    pub records_skipped: i64,
    pub records_errored: i64,
    pub error_detail: Option<String>,
}
