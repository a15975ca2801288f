//! Legislative raw-domain entities (§3 "Legislative") and the Bill state
//! machine (§4.7).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Legislator {
    pub id: i64,
    pub tenant_id: String,
    pub external_id: String,
    pub first_name: String,
    pub last_name: String,
    pub block: Option<String>,
    pub province: Option<String>,
    pub active: bool,
    pub chamber: String,
    pub term_start: String,
    pub term_end: Option<String>,
}

/// The bill's main sequence, in the order the normaliser is allowed to
/// advance through it. `REJECTED`/`WITHDRAWN`/`EXPIRED`/`ARCHIVED` are
/// parallel terminal states reachable from any non-terminal step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillStatus {
    Presented,
    InCommittee,
    WithOpinion,
    ApprovedCommittee,
    FloorVote,
    ApprovedChamber,
    SentToOtherChamber,
    Approved,
    Rejected,
    Withdrawn,
    Expired,
    Archived,
}

impl BillStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BillStatus::Presented => "PRESENTED",
            BillStatus::InCommittee => "IN_COMMITTEE",
            BillStatus::WithOpinion => "WITH_OPINION",
            BillStatus::ApprovedCommittee => "APPROVED_COMMITTEE",
            BillStatus::FloorVote => "FLOOR_VOTE",
            BillStatus::ApprovedChamber => "APPROVED_CHAMBER",
            BillStatus::SentToOtherChamber => "SENT_TO_OTHER_CHAMBER",
            BillStatus::Approved => "APPROVED",
            BillStatus::Rejected => "REJECTED",
            BillStatus::Withdrawn => "WITHDRAWN",
            BillStatus::Expired => "EXPIRED",
            BillStatus::Archived => "ARCHIVED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "PRESENTED" => BillStatus::Presented,
            "IN_COMMITTEE" => BillStatus::InCommittee,
            "WITH_OPINION" => BillStatus::WithOpinion,
            "APPROVED_COMMITTEE" => BillStatus::ApprovedCommittee,
            "FLOOR_VOTE" => BillStatus::FloorVote,
            "APPROVED_CHAMBER" => BillStatus::ApprovedChamber,
            "SENT_TO_OTHER_CHAMBER" => BillStatus::SentToOtherChamber,
            "APPROVED" => BillStatus::Approved,
            "REJECTED" => BillStatus::Rejected,
            "WITHDRAWN" => BillStatus::Withdrawn,
            "EXPIRED" => BillStatus::Expired,
            "ARCHIVED" => BillStatus::Archived,
            _ => return None,
        })
    }

    /// Position in the main sequence; terminal states sort after every
    /// non-terminal step so they are never treated as a regression.
    fn sequence_rank(&self) -> u8 {
        match self {
            BillStatus::Presented => 0,
            BillStatus::InCommittee => 1,
            BillStatus::WithOpinion => 2,
            BillStatus::ApprovedCommittee => 3,
            BillStatus::FloorVote => 4,
            BillStatus::ApprovedChamber => 5,
            BillStatus::SentToOtherChamber => 6,
            BillStatus::Approved => 7,
            BillStatus::Rejected
            | BillStatus::Withdrawn
            | BillStatus::Expired
            | BillStatus::Archived => 255,
        }
    }

    /// "The normaliser only advances; a `to_status` earlier than the
    /// current status is recorded in history but does not update the
    /// bill's current status" (§4.7).
    pub fn advances_from(&self, current: &BillStatus) -> bool {
        self.sequence_rank() >= current.sequence_rank()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    pub id: i64,
    pub tenant_id: String,
    pub external_id: String,
    pub title: String,
    pub status: BillStatus,
    pub bill_type: String,
    pub presented_date: String,
    pub period: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillMovement {
    pub id: i64,
    pub bill_id: i64,
    pub order_index: i64,
    pub description: String,
    pub from_status: BillStatus,
    pub to_status: BillStatus,
    pub movement_date: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthorRole {
    Author,
    Coauthor,
}

impl AuthorRole {
    pub fn as_str(&self) -> &str {
        match self {
            AuthorRole::Author => "author",
            AuthorRole::Coauthor => "coauthor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "author" => Some(AuthorRole::Author),
            "coauthor" => Some(AuthorRole::Coauthor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillAuthor {
    pub id: i64,
    pub bill_id: i64,
    pub legislator_id: i64,
    pub role: AuthorRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteEvent {
    pub id: i64,
    pub tenant_id: String,
    pub external_id: String,
    pub session: String,
    pub title: String,
    pub affirmative: i64,
    pub negative: i64,
    pub abstention: i64,
    pub absent: i64,
    pub result: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Vote {
    Affirm,
    Neg,
    Abst,
    Absent,
}

impl Vote {
    pub fn as_str(&self) -> &str {
        match self {
            Vote::Affirm => "AFFIRM",
            Vote::Neg => "NEG",
            Vote::Abst => "ABST",
            Vote::Absent => "ABSENT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "AFFIRM" => Some(Vote::Affirm),
            "NEG" => Some(Vote::Neg),
            "ABST" => Some(Vote::Abst),
            "ABSENT" => Some(Vote::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResult {
    pub id: i64,
    pub vote_event_id: i64,
    pub legislator_id: i64,
    pub vote: Vote,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendance {
    pub id: i64,
    pub tenant_id: String,
    pub session: String,
    pub legislator_id: i64,
    pub status: AttendanceStatus,
}

/// Seeded but never ingested from a real source (§9 Open Questions) — kept
/// for schema completeness only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commission {
    pub id: i64,
    pub tenant_id: String,
    pub external_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub tenant_id: String,
    pub external_id: String,
    pub held_at: String,
}
