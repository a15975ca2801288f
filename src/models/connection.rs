//! Connection
//! Mission: bind a Tenant to one external source. Token is a secret; it is
//! never logged or serialized back to the client.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "syncing" => SyncStatus::Syncing,
            "synced" => SyncStatus::Synced,
            "error" => SyncStatus::Error,
            _ => SyncStatus::Pending,
        }
    }

    /// `error -> syncing` is always allowed; every other transition only
    /// moves forward through the state machine in §4.7.
    pub fn can_transition_to(&self, next: &SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (Pending, Syncing)
                | (Syncing, Synced)
                | (Syncing, Error)
                | (Synced, Syncing)
                | (Error, Syncing)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub tenant_id: String,
    pub source_domain: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub scopes: Vec<String>,
    pub last_sync: Option<String>,
    pub sync_status: SyncStatus,
    pub strike_count: i64,
    pub created_at: String,
}
