//! Legislative upsert rules (§4.5 "Specific rules").
//!
//! CKAN datastore records arrive as a flat array (the adapter already
//! unwraps `result.records`), one object per row.

use super::{NormalizeCtx, NormalizeOutcome, Normalizer, Transition};
use crate::adapters::RawPayload;
use crate::error::{AppError, AppResult};
use crate::models::{AuthorRole, BillStatus, Vote};
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CkanLegislatorRow {
    external_id: String,
    first_name: String,
    last_name: String,
    block: Option<String>,
    province: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
    chamber: String,
    term_start: String,
    term_end: Option<String>,
}

fn default_true() -> bool {
    true
}

pub struct LegislatorNormalizer;

impl Normalizer for LegislatorNormalizer {
    fn normalize(&self, raw: RawPayload, ctx: &NormalizeCtx) -> AppResult<NormalizeOutcome> {
        let rows: Vec<CkanLegislatorRow> = serde_json::from_value(raw.payload)
            .map_err(|e| AppError::SourceSchema(format!("legislator payload mismatch: {e}")))?;

        let mut outcome = NormalizeOutcome::default();
        let conn = ctx.db.get()?;

        for row in rows {
            conn.execute(
                "INSERT INTO legislators (tenant_id, external_id, first_name, last_name, block, province, active, chamber, term_start, term_end, source_ref_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(tenant_id, external_id) DO UPDATE SET
                   first_name = excluded.first_name,
                   last_name = excluded.last_name,
                   block = excluded.block,
                   province = excluded.province,
                   active = excluded.active,
                   chamber = excluded.chamber,
                   term_start = excluded.term_start,
                   term_end = excluded.term_end,
                   source_ref_id = excluded.source_ref_id",
                params![
                    ctx.tenant_id,
                    row.external_id,
                    row.first_name,
                    row.last_name,
                    row.block,
                    row.province,
                    row.active,
                    row.chamber,
                    row.term_start,
                    row.term_end,
                    ctx.source_ref_id,
                ],
            )?;
            outcome.affected.insert(format!("legislator:{}:{}", ctx.tenant_id, row.external_id));
        }

        Ok(outcome)
    }
}

#[derive(Debug, Deserialize)]
struct CkanBillAuthorRow {
    legislator_external_id: String,
    role: String,
}

#[derive(Debug, Deserialize)]
struct CkanBillRow {
    external_id: String,
    title: String,
    status: String,
    bill_type: String,
    presented_date: String,
    period: String,
    movement_description: Option<String>,
    #[serde(default)]
    authors: Vec<CkanBillAuthorRow>,
}

pub struct BillNormalizer;

impl Normalizer for BillNormalizer {
    fn normalize(&self, raw: RawPayload, ctx: &NormalizeCtx) -> AppResult<NormalizeOutcome> {
        let rows: Vec<CkanBillRow> = serde_json::from_value(raw.payload)
            .map_err(|e| AppError::SourceSchema(format!("bill payload mismatch: {e}")))?;

        let mut outcome = NormalizeOutcome::default();
        let conn = ctx.db.get()?;

        for row in rows {
            let Some(new_status) = BillStatus::from_str(&row.status) else {
                outcome.errors += 1;
                continue;
            };

            let pre: Option<(i64, String)> = conn
                .query_row(
                    "SELECT id, status FROM bills WHERE tenant_id = ?1 AND external_id = ?2",
                    params![ctx.tenant_id, row.external_id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

            let is_new = pre.is_none();
            let pre_status = pre
                .as_ref()
                .and_then(|(_, s)| BillStatus::from_str(s))
                .unwrap_or(BillStatus::Presented);

            // "the normaliser only advances" (§4.7): a regression is recorded
            // in bill_movements below but never overwrites current status.
            let effective_status = if is_new || new_status.advances_from(&pre_status) {
                new_status
            } else {
                pre_status
            };

            conn.execute(
                "INSERT INTO bills (tenant_id, external_id, title, status, bill_type, presented_date, period, source_ref_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(tenant_id, external_id) DO UPDATE SET
                   title = excluded.title,
                   status = excluded.status,
                   bill_type = excluded.bill_type,
                   presented_date = excluded.presented_date,
                   period = excluded.period,
                   source_ref_id = excluded.source_ref_id",
                params![
                    ctx.tenant_id,
                    row.external_id,
                    row.title,
                    effective_status.as_str(),
                    row.bill_type,
                    row.presented_date,
                    row.period,
                    ctx.source_ref_id,
                ],
            )?;

            let bill_id: i64 = conn.query_row(
                "SELECT id FROM bills WHERE tenant_id = ?1 AND external_id = ?2",
                params![ctx.tenant_id, row.external_id],
                |r| r.get(0),
            )?;

            if is_new {
                outcome.transitions.push(Transition::BillCreated { bill_id });
            } else if new_status != pre_status {
                let order_index: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM bill_movements WHERE bill_id = ?1",
                    params![bill_id],
                    |r| r.get(0),
                )?;
                conn.execute(
                    "INSERT INTO bill_movements (bill_id, order_index, description, from_status, to_status, movement_date)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        bill_id,
                        order_index,
                        row.movement_description.clone().unwrap_or_else(|| "status change".to_string()),
                        pre_status.as_str(),
                        new_status.as_str(),
                        row.presented_date,
                    ],
                )?;
                outcome.transitions.push(Transition::BillMovement {
                    bill_id,
                    from: pre_status.as_str().to_string(),
                    to: new_status.as_str().to_string(),
                });
            }

            for author in row.authors {
                let Some(role) = AuthorRole::from_str(&author.role) else {
                    outcome.errors += 1;
                    continue;
                };
                let legislator_id: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM legislators WHERE tenant_id = ?1 AND external_id = ?2",
                        params![ctx.tenant_id, author.legislator_external_id],
                        |r| r.get(0),
                    )
                    .optional()?;
                // "A missing referenced legislator ... silently skips the
                // dependent row and increments an error counter" (§4.5).
                let Some(legislator_id) = legislator_id else {
                    outcome.errors += 1;
                    continue;
                };
                conn.execute(
                    "INSERT INTO bill_authors (bill_id, legislator_id, role) VALUES (?1, ?2, ?3)
                     ON CONFLICT(bill_id, legislator_id, role) DO NOTHING",
                    params![bill_id, legislator_id, role.as_str()],
                )?;
                outcome.affected.insert(format!(
                    "legislator_metrics:{}:{}:{}",
                    ctx.tenant_id, legislator_id, row.period
                ));
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod bill_tests {
    use super::*;
    use crate::db::connect_in_memory;

    fn seed(conn: &rusqlite::Connection) {
        conn.execute("INSERT INTO tenants (id, plan_tier, created_at) VALUES ('t1','free','2026-01-01')", []).unwrap();
        conn.execute(
            "INSERT INTO legislators (tenant_id, external_id, first_name, last_name, chamber, term_start) VALUES ('t1','L-1','Ada','Lovelace','lower','2020-01-01T00:00:00Z')",
            [],
        ).unwrap();
    }

    #[test]
    fn advancing_status_records_one_movement_and_bumps_status() {
        let pool = connect_in_memory().unwrap();
        { let conn = pool.get().unwrap(); seed(&conn); }
        let ctx = NormalizeCtx { db: &pool, tenant_id: "t1", source_ref_id: 1 };

        let presented = serde_json::json!([{
            "external_id": "B-1", "title": "An Act", "status": "PRESENTED", "bill_type": "ordinary",
            "presented_date": "2026-01-01", "period": "2026", "movement_description": null,
            "authors": [{"legislator_external_id": "L-1", "role": "author"}]
        }]);
        BillNormalizer.normalize(RawPayload { data_type: "bills".into(), payload: presented }, &ctx).unwrap();

        let moved = serde_json::json!([{
            "external_id": "B-1", "title": "An Act", "status": "IN_COMMITTEE", "bill_type": "ordinary",
            "presented_date": "2026-01-02", "period": "2026", "movement_description": "referred to committee",
            "authors": [{"legislator_external_id": "L-1", "role": "author"}]
        }]);
        let outcome = BillNormalizer.normalize(RawPayload { data_type: "bills".into(), payload: moved }, &ctx).unwrap();

        assert_eq!(outcome.transitions.len(), 1);
        assert!(matches!(&outcome.transitions[0], Transition::BillMovement { from, to, .. } if from == "PRESENTED" && to == "IN_COMMITTEE"));

        let conn = pool.get().unwrap();
        let (status, movement_count): (String, i64) = conn.query_row(
            "SELECT b.status, (SELECT COUNT(*) FROM bill_movements WHERE bill_id = b.id) FROM bills b WHERE b.external_id = 'B-1'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        ).unwrap();
        assert_eq!(status, "IN_COMMITTEE");
        assert_eq!(movement_count, 1);
    }

    #[test]
    fn regressive_status_is_logged_but_does_not_move_current_status() {
        let pool = connect_in_memory().unwrap();
        { let conn = pool.get().unwrap(); seed(&conn); }
        let ctx = NormalizeCtx { db: &pool, tenant_id: "t1", source_ref_id: 1 };

        let approved = serde_json::json!([{
            "external_id": "B-2", "title": "Another Act", "status": "APPROVED_COMMITTEE", "bill_type": "ordinary",
            "presented_date": "2026-01-01", "period": "2026", "movement_description": null, "authors": []
        }]);
        BillNormalizer.normalize(RawPayload { data_type: "bills".into(), payload: approved }, &ctx).unwrap();

        let regressed = serde_json::json!([{
            "external_id": "B-2", "title": "Another Act", "status": "PRESENTED", "bill_type": "ordinary",
            "presented_date": "2026-01-02", "period": "2026", "movement_description": "correction", "authors": []
        }]);
        BillNormalizer.normalize(RawPayload { data_type: "bills".into(), payload: regressed }, &ctx).unwrap();

        let conn = pool.get().unwrap();
        let status: String = conn.query_row("SELECT status FROM bills WHERE external_id = 'B-2'", [], |r| r.get(0)).unwrap();
        assert_eq!(status, "APPROVED_COMMITTEE");
    }
}

#[derive(Debug, Deserialize)]
struct CkanVoteResultRow {
    legislator_external_id: String,
    vote: String,
}

#[derive(Debug, Deserialize)]
struct CkanVoteEventRow {
    external_id: String,
    session: String,
    title: String,
    affirmative: i64,
    negative: i64,
    abstention: i64,
    absent: i64,
    result: String,
    /// Legislative period the vote belongs to, carried the same way
    /// `CkanBillRow::period` is — the source feed knows it, the session
    /// identifier alone doesn't reliably decode to it.
    period: String,
    #[serde(default)]
    votes: Vec<CkanVoteResultRow>,
}

pub struct VoteEventNormalizer;

impl Normalizer for VoteEventNormalizer {
    fn normalize(&self, raw: RawPayload, ctx: &NormalizeCtx) -> AppResult<NormalizeOutcome> {
        let rows: Vec<CkanVoteEventRow> = serde_json::from_value(raw.payload)
            .map_err(|e| AppError::SourceSchema(format!("vote event payload mismatch: {e}")))?;

        let mut outcome = NormalizeOutcome::default();
        let conn = ctx.db.get()?;

        for row in rows {
            // Tallies are overwritten from the payload verbatim, not
            // recomputed locally — "the authoritative source is the feed" (§4.5).
            conn.execute(
                "INSERT INTO vote_events (tenant_id, external_id, session, period, title, affirmative, negative, abstention, absent, result, source_ref_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(tenant_id, external_id) DO UPDATE SET
                   session = excluded.session,
                   period = excluded.period,
                   title = excluded.title,
                   affirmative = excluded.affirmative,
                   negative = excluded.negative,
                   abstention = excluded.abstention,
                   absent = excluded.absent,
                   result = excluded.result,
                   source_ref_id = excluded.source_ref_id",
                params![
                    ctx.tenant_id,
                    row.external_id,
                    row.session,
                    row.period,
                    row.title,
                    row.affirmative,
                    row.negative,
                    row.abstention,
                    row.absent,
                    row.result,
                    ctx.source_ref_id,
                ],
            )?;

            let vote_event_id: i64 = conn.query_row(
                "SELECT id FROM vote_events WHERE tenant_id = ?1 AND external_id = ?2",
                params![ctx.tenant_id, row.external_id],
                |r| r.get(0),
            )?;

            for vote_row in row.votes {
                let Some(vote) = Vote::from_str(&vote_row.vote) else {
                    outcome.errors += 1;
                    continue;
                };
                let legislator_id: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM legislators WHERE tenant_id = ?1 AND external_id = ?2",
                        params![ctx.tenant_id, vote_row.legislator_external_id],
                        |r| r.get(0),
                    )
                    .optional()?;
                let Some(legislator_id) = legislator_id else {
                    outcome.errors += 1;
                    continue;
                };

                conn.execute(
                    "INSERT INTO vote_results (vote_event_id, legislator_id, vote) VALUES (?1, ?2, ?3)
                     ON CONFLICT(vote_event_id, legislator_id) DO UPDATE SET vote = excluded.vote",
                    params![vote_event_id, legislator_id, vote.as_str()],
                )?;
                outcome.affected.insert(format!(
                    "legislator_metrics:{}:{}:{}",
                    ctx.tenant_id, legislator_id, row.period
                ));
            }

            outcome.transitions.push(Transition::VoteResultRecorded { vote_event_id });
        }

        Ok(outcome)
    }
}

#[derive(Debug, Deserialize)]
struct CkanAttendanceRow {
    session: String,
    legislator_external_id: String,
    status: String,
    /// Legislative period the session falls in, carried the same way
    /// `CkanBillRow::period` is.
    period: String,
}

pub struct AttendanceNormalizer;

impl Normalizer for AttendanceNormalizer {
    fn normalize(&self, raw: RawPayload, ctx: &NormalizeCtx) -> AppResult<NormalizeOutcome> {
        let rows: Vec<CkanAttendanceRow> = serde_json::from_value(raw.payload)
            .map_err(|e| AppError::SourceSchema(format!("attendance payload mismatch: {e}")))?;

        let mut outcome = NormalizeOutcome::default();
        let conn = ctx.db.get()?;

        for row in rows {
            use crate::models::AttendanceStatus;
            let Some(status) = AttendanceStatus::from_str(&row.status) else {
                outcome.errors += 1;
                continue;
            };

            let legislator_id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM legislators WHERE tenant_id = ?1 AND external_id = ?2",
                    params![ctx.tenant_id, row.legislator_external_id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(legislator_id) = legislator_id else {
                outcome.errors += 1;
                continue;
            };

            conn.execute(
                "INSERT INTO attendances (tenant_id, session, period, legislator_id, status) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tenant_id, session, legislator_id) DO UPDATE SET period = excluded.period, status = excluded.status",
                params![ctx.tenant_id, row.session, row.period, legislator_id, status.as_str()],
            )?;

            outcome.transitions.push(Transition::AttendanceRecorded {
                legislator_id,
                session: row.session,
            });
            outcome.affected.insert(format!(
                "legislator_metrics:{}:{}:{}",
                ctx.tenant_id, legislator_id, row.period
            ));
        }

        Ok(outcome)
    }
}
