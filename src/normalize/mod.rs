//! Normalizer (C5, §4.5)
//! Mission: parse raw payloads, upsert into the relational model, detect
//! the transitions that drive metrics recomputation and feed generation.

pub mod commerce;
pub mod legislative;

use crate::adapters::RawPayload;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::queue::store::{self, EnqueueOptions, QueueName};
use std::collections::HashSet;

/// A detected state transition, consumed by the feed step (§4.7). Each
/// variant names exactly the event kinds §4.5 calls out.
#[derive(Debug, Clone)]
pub enum Transition {
    BillCreated { bill_id: i64 },
    BillMovement { bill_id: i64, from: String, to: String },
    VoteResultRecorded { vote_event_id: i64 },
    AttendanceRecorded { legislator_id: i64, session: String },
    OrderCreated { order_id: i64 },
}

/// What one `normalize` job call has finished touching. `affected`
/// entities get a deduplicated `Recompute` job; `transitions` each get a
/// feed-generation job.
#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    pub affected: HashSet<String>,
    pub transitions: Vec<Transition>,
    pub errors: u64,
}

pub struct NormalizeCtx<'a> {
    pub db: &'a DbPool,
    pub tenant_id: &'a str,
    pub source_ref_id: i64,
}

/// Per-data-type normalizer. One impl per `(vertical, data_type)` pair.
pub trait Normalizer {
    fn normalize(&self, raw: RawPayload, ctx: &NormalizeCtx) -> AppResult<NormalizeOutcome>;
}

/// Enqueue the follow-on `Recompute`/`EmitFeed` jobs for one outcome,
/// deduplicated the way §4.5 "Track a set `affected`" requires.
pub fn enqueue_followups(
    db: &DbPool,
    tenant_id: &str,
    outcome: &NormalizeOutcome,
) -> AppResult<()> {
    for entity_key in &outcome.affected {
        store::enqueue(
            db,
            QueueName::Metrics,
            "RecomputeMetrics",
            &serde_json::json!({ "entity_key": entity_key }),
            EnqueueOptions {
                dedup_key: Some(entity_key.clone()),
                tenant_id: Some(tenant_id.to_string()),
                ..Default::default()
            },
        )?;
    }

    for (i, transition) in outcome.transitions.iter().enumerate() {
        let payload = serde_json::to_value(TransitionPayload::from(transition))?;
        store::enqueue(
            db,
            QueueName::Feed,
            "EmitFeed",
            &payload,
            EnqueueOptions {
                dedup_key: Some(format!("{tenant_id}:{i}:{transition:?}")),
                tenant_id: Some(tenant_id.to_string()),
                ..Default::default()
            },
        )?;
    }

    Ok(())
}

/// Serialisable mirror of `Transition`, tagged so `feed::render` can match
/// on `kind` after a round trip through the job queue's JSON payload.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
pub enum TransitionPayload {
    BillCreated { bill_id: i64 },
    BillMovement { bill_id: i64, from: String, to: String },
    VoteResultRecorded { vote_event_id: i64 },
    AttendanceRecorded { legislator_id: i64, session: String },
    OrderCreated { order_id: i64 },
}

impl From<&Transition> for TransitionPayload {
    fn from(t: &Transition) -> Self {
        match t {
            Transition::BillCreated { bill_id } => TransitionPayload::BillCreated { bill_id: *bill_id },
            Transition::BillMovement { bill_id, from, to } => TransitionPayload::BillMovement {
                bill_id: *bill_id,
                from: from.clone(),
                to: to.clone(),
            },
            Transition::VoteResultRecorded { vote_event_id } => {
                TransitionPayload::VoteResultRecorded { vote_event_id: *vote_event_id }
            }
            Transition::AttendanceRecorded { legislator_id, session } => {
                TransitionPayload::AttendanceRecorded {
                    legislator_id: *legislator_id,
                    session: session.clone(),
                }
            }
            Transition::OrderCreated { order_id } => TransitionPayload::OrderCreated { order_id: *order_id },
        }
    }
}
