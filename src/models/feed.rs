//! FeedPost — chronological, append-only (§3, §4.7).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedPostType {
    Created,
    Movement,
    VoteResult,
    Attendance,
    AnalysisReady,
}

impl FeedPostType {
    pub fn as_str(&self) -> &str {
        match self {
            FeedPostType::Created => "BILL_CREATED",
            FeedPostType::Movement => "BILL_MOVEMENT",
            FeedPostType::VoteResult => "VOTE_RESULT",
            FeedPostType::Attendance => "ATTENDANCE_RECORD",
            FeedPostType::AnalysisReady => "ANALYSIS_READY",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPost {
    pub id: i64,
    pub tenant_id: Option<String>,
    pub post_type: FeedPostType,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub tags: Vec<String>,
    pub source_ref_id: Option<i64>,
    pub auto_generated: bool,
    pub created_at: String,
}
