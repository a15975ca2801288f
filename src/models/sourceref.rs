//! SourceRef — append-only audit record of one raw fetch.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: i64,
    pub tenant_id: String,
    pub source_key: String,
    pub data_type: String,
    pub checksum: String,
    pub blob_location: String,
    pub fetched_at: String,
    pub ingestion_run_id: i64,
    pub status: String,
}
