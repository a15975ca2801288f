//! Legislator metrics (§4.6.1).
//!
//! Grounded on `signals/quality.rs`'s "pure function of current state, no
//! mutation of inputs" shape: this reads the raw tables for one legislator
//! and period and writes a single upserted row, never touching what it read.

use crate::db::DbPool;
use crate::error::AppResult;
use chrono::{Datelike, Utc};
use rusqlite::params;

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Recompute `LegislatorMetric` for `(legislator_id, period)` from the
/// legislator's current `bill_authors`, `attendances` and `vote_results`
/// rows. `period` is a calendar year, e.g. `"2026"`.
pub fn recompute_legislator_metrics(db: &DbPool, legislator_id: i64, period: &str) -> AppResult<()> {
    let conn = db.get()?;

    let bills_authored: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bill_authors ba
         JOIN bills b ON b.id = ba.bill_id
         WHERE ba.legislator_id = ?1 AND ba.role = 'author' AND b.period = ?2",
        params![legislator_id, period],
        |r| r.get(0),
    )?;

    let bills_cosigned: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bill_authors ba
         JOIN bills b ON b.id = ba.bill_id
         WHERE ba.legislator_id = ?1 AND ba.role = 'coauthor' AND b.period = ?2",
        params![legislator_id, period],
        |r| r.get(0),
    )?;

    let bills_with_advancement: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bill_authors ba
         JOIN bills b ON b.id = ba.bill_id
         WHERE ba.legislator_id = ?1 AND ba.role = 'author' AND b.period = ?2 AND b.status != 'PRESENTED'",
        params![legislator_id, period],
        |r| r.get(0),
    )?;

    let advancement_rate = if bills_authored == 0 {
        0.0
    } else {
        round4(bills_with_advancement as f64 / bills_authored as f64)
    };

    let attendance_total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attendances WHERE legislator_id = ?1 AND period = ?2",
        params![legislator_id, period],
        |r| r.get(0),
    )?;
    let attendance_present: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attendances WHERE legislator_id = ?1 AND period = ?2 AND status = 'present'",
        params![legislator_id, period],
        |r| r.get(0),
    )?;
    let attendance_rate = if attendance_total == 0 {
        0.0
    } else {
        round4(attendance_present as f64 / attendance_total as f64)
    };

    let vote_total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM vote_results vr
         JOIN vote_events ve ON ve.id = vr.vote_event_id
         WHERE vr.legislator_id = ?1 AND ve.period = ?2",
        params![legislator_id, period],
        |r| r.get(0),
    )?;
    let vote_participated: i64 = conn.query_row(
        "SELECT COUNT(*) FROM vote_results vr
         JOIN vote_events ve ON ve.id = vr.vote_event_id
         WHERE vr.legislator_id = ?1 AND ve.period = ?2 AND vr.vote != 'ABSENT'",
        params![legislator_id, period],
        |r| r.get(0),
    )?;
    let vote_participation_rate = if vote_total == 0 {
        0.0
    } else {
        round4(vote_participated as f64 / vote_total as f64)
    };

    // Commission membership carries no period of its own — §4.5 notes it's
    // "partially seeded but never ingested from a real source", so this is a
    // current-membership count shared across every period row, not a
    // per-period tally like the fields above.
    let commissions_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM commission_members WHERE legislator_id = ?1",
        params![legislator_id],
        |r| r.get(0),
    )?;

    let term_start: String = conn.query_row(
        "SELECT term_start FROM legislators WHERE id = ?1",
        params![legislator_id],
        |r| r.get(0),
    )?;
    let months_in_office = months_between(&term_start, Utc::now()).max(1);
    let normalised_productivity = round4(bills_authored as f64 / months_in_office as f64);

    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO legislator_metrics
            (legislator_id, period, bills_authored, bills_cosigned, bills_with_advancement,
             advancement_rate, attendance_rate, vote_participation_rate, commissions_count,
             normalised_productivity, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(legislator_id, period) DO UPDATE SET
           bills_authored = excluded.bills_authored,
           bills_cosigned = excluded.bills_cosigned,
           bills_with_advancement = excluded.bills_with_advancement,
           advancement_rate = excluded.advancement_rate,
           attendance_rate = excluded.attendance_rate,
           vote_participation_rate = excluded.vote_participation_rate,
           commissions_count = excluded.commissions_count,
           normalised_productivity = excluded.normalised_productivity,
           updated_at = excluded.updated_at",
        params![
            legislator_id,
            period,
            bills_authored,
            bills_cosigned,
            bills_with_advancement,
            advancement_rate,
            attendance_rate,
            vote_participation_rate,
            commissions_count,
            normalised_productivity,
            now,
        ],
    )?;

    Ok(())
}

fn months_between(term_start_iso: &str, now: chrono::DateTime<Utc>) -> i64 {
    let Ok(start) = chrono::DateTime::parse_from_rfc3339(term_start_iso) else {
        return 1;
    };
    let years = now.year() - start.year();
    let months = now.month() as i64 - start.month() as i64;
    (years as i64 * 12 + months).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    fn seed(conn: &rusqlite::Connection) -> i64 {
        conn.execute("INSERT INTO tenants (id, plan_tier, created_at) VALUES ('t1','free','2026-01-01')", []).unwrap();
        conn.execute(
            "INSERT INTO legislators (tenant_id, external_id, first_name, last_name, chamber, term_start) VALUES ('t1','L1','Ada','Lovelace','lower','2020-01-01T00:00:00Z')",
            [],
        ).unwrap();
        let legislator_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO bills (tenant_id, external_id, title, status, bill_type, presented_date, period) VALUES ('t1','B1','Title','APPROVED','ordinary','2026-01-01','2026')",
            [],
        ).unwrap();
        let bill_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO bill_authors (bill_id, legislator_id, role) VALUES (?1, ?2, 'author')",
            params![bill_id, legislator_id],
        ).unwrap();
        legislator_id
    }

    #[test]
    fn advancement_rate_counts_only_past_presented() {
        let pool = connect_in_memory().unwrap();
        let legislator_id = { let conn = pool.get().unwrap(); seed(&conn) };

        recompute_legislator_metrics(&pool, legislator_id, "2026").unwrap();

        let conn = pool.get().unwrap();
        let (authored, advancement): (i64, f64) = conn.query_row(
            "SELECT bills_authored, advancement_rate FROM legislator_metrics WHERE legislator_id = ?1",
            params![legislator_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        ).unwrap();
        assert_eq!(authored, 1);
        assert_eq!(advancement, 1.0);
    }

    #[test]
    fn zero_denominator_yields_zero_rate_not_nan() {
        let pool = connect_in_memory().unwrap();
        let conn = pool.get().unwrap();
        conn.execute("INSERT INTO tenants (id, plan_tier, created_at) VALUES ('t1','free','2026-01-01')", []).unwrap();
        conn.execute(
            "INSERT INTO legislators (tenant_id, external_id, first_name, last_name, chamber, term_start) VALUES ('t1','L2','Grace','Hopper','lower','2026-01-01T00:00:00Z')",
            [],
        ).unwrap();
        let legislator_id = conn.last_insert_rowid();
        drop(conn);

        recompute_legislator_metrics(&pool, legislator_id, "2026").unwrap();

        let conn = pool.get().unwrap();
        let rate: f64 = conn.query_row(
            "SELECT advancement_rate FROM legislator_metrics WHERE legislator_id = ?1",
            params![legislator_id],
            |r| r.get(0),
        ).unwrap();
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn attendance_and_vote_rates_are_scoped_to_the_requested_period() {
        let pool = connect_in_memory().unwrap();
        let legislator_id = { let conn = pool.get().unwrap(); seed(&conn) };
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO attendances (tenant_id, session, period, legislator_id, status) VALUES ('t1','S1','2026',?1,'present')",
            params![legislator_id],
        ).unwrap();
        conn.execute(
            "INSERT INTO attendances (tenant_id, session, period, legislator_id, status) VALUES ('t1','S2','2020',?1,'absent')",
            params![legislator_id],
        ).unwrap();
        conn.execute(
            "INSERT INTO vote_events (tenant_id, external_id, session, period, title) VALUES ('t1','V1','S1','2026','first vote')",
            [],
        ).unwrap();
        let vote_event_id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO vote_results (vote_event_id, legislator_id, vote) VALUES (?1, ?2, 'AFFIRM')",
            params![vote_event_id, legislator_id],
        ).unwrap();
        drop(conn);

        recompute_legislator_metrics(&pool, legislator_id, "2026").unwrap();
        recompute_legislator_metrics(&pool, legislator_id, "2020").unwrap();

        let conn = pool.get().unwrap();
        let (attendance_2026, votes_2026): (f64, f64) = conn.query_row(
            "SELECT attendance_rate, vote_participation_rate FROM legislator_metrics WHERE legislator_id = ?1 AND period = '2026'",
            params![legislator_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        ).unwrap();
        let (attendance_2020, votes_2020): (f64, f64) = conn.query_row(
            "SELECT attendance_rate, vote_participation_rate FROM legislator_metrics WHERE legislator_id = ?1 AND period = '2020'",
            params![legislator_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        ).unwrap();

        assert_eq!(attendance_2026, 1.0);
        assert_eq!(votes_2026, 1.0);
        assert_eq!(attendance_2020, 0.0);
        assert_eq!(votes_2020, 0.0);
    }
}
