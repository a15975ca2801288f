//! LegislatorMetric — one row per (legislator, period), §4.6.1.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegislatorMetric {
    pub id: i64,
    pub legislator_id: i64,
    pub period: String,
    pub bills_authored: i64,
    pub bills_cosigned: i64,
    pub bills_with_advancement: i64,
    pub advancement_rate: f64,
    pub attendance_rate: f64,
    pub vote_participation_rate: f64,
    pub commissions_count: i64,
    pub normalised_productivity: f64,
    pub updated_at: String,
}
