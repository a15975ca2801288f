//! Scheduler (C3, §4.3).
//! Mission: fire the two built-in cron schedules exactly once per period,
//! even across downtime longer than the interval.
//!
//! Grounded on the teacher's `main.rs` interval-loop idiom
//! (`tokio::time::interval`) generalised from a fixed poll to a minute
//! tick that checks cron schedules against the wall clock.

use chrono::Utc;
use cron::Schedule;
use rusqlite::{params, OptionalExtension};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use crate::queue::store::{self, EnqueueOptions, QueueName};

/// Schedule lines are data, not code (§4.3).
pub struct ScheduleEntry {
    pub name: &'static str,
    pub cron_expr: &'static str,
}

pub const BUILTIN_SCHEDULES: &[ScheduleEntry] = &[
    ScheduleEntry { name: "ingest_all_sources", cron_expr: "0 0 */6 * * *" },
    ScheduleEntry { name: "metrics_recompute_all", cron_expr: "0 0 3 * * *" },
];

pub struct Scheduler {
    db: DbPool,
    tick: Duration,
}

impl Scheduler {
    pub fn new(db: DbPool) -> Self {
        Self { db, tick: Duration::from_secs(60) }
    }

    /// Refuses to run if the queue store isn't reachable (§4.3 "refuses to
    /// run if absent") — exit code 1 per §6.
    pub fn verify_startup(&self) -> AppResult<()> {
        store::queue_connectivity_check(&self.db).map_err(|e| {
            error!(error = %e, "scheduler startup connectivity check failed");
            e
        })
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.tick);
        loop {
            interval.tick().await;
            for entry in BUILTIN_SCHEDULES {
                if let Err(e) = self.maybe_fire(entry) {
                    warn!(schedule = entry.name, error = %e, "schedule tick failed");
                }
            }
        }
    }

    /// Collapses missed fires across downtime: a schedule only ever fires
    /// once per tick regardless of how many periods it missed, because
    /// `last_fired_at` records the most recent fire, not a queue of due
    /// periods.
    fn maybe_fire(&self, entry: &ScheduleEntry) -> AppResult<()> {
        let schedule = Schedule::from_str(entry.cron_expr)
            .map_err(|e| AppError::Config(format!("invalid cron expression {}: {e}", entry.cron_expr)))?;
        let now = Utc::now();

        let conn = self.db.get()?;
        let last_fired_at: Option<String> = conn
            .query_row(
                "SELECT last_fired_at FROM schedule_state WHERE schedule_name = ?1",
                params![entry.name],
                |r| r.get(0),
            )
            .optional()?;

        let due = match &last_fired_at {
            None => true,
            Some(last) => {
                let Ok(last_dt) = chrono::DateTime::parse_from_rfc3339(last) else { return Ok(()) };
                schedule
                    .after(&last_dt.with_timezone(&Utc))
                    .next()
                    .map(|next_due| next_due <= now)
                    .unwrap_or(false)
            }
        };

        if !due {
            return Ok(());
        }

        conn.execute(
            "INSERT INTO schedule_state (schedule_name, last_fired_at) VALUES (?1, ?2)
             ON CONFLICT(schedule_name) DO UPDATE SET last_fired_at = excluded.last_fired_at",
            params![entry.name, now.to_rfc3339()],
        )?;
        drop(conn);

        info!(schedule = entry.name, "firing schedule");
        match entry.name {
            "ingest_all_sources" => self.enqueue_ingest_all()?,
            "metrics_recompute_all" => self.enqueue_metrics_recompute_all()?,
            other => warn!(schedule = other, "no handler for schedule"),
        }

        Ok(())
    }

    fn enqueue_ingest_all(&self) -> AppResult<()> {
        let conn = self.db.get()?;
        let mut stmt = conn.prepare("SELECT id, tenant_id FROM connections WHERE sync_status != 'syncing'")?;
        let connections: Vec<(String, String)> =
            stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?.collect::<Result<_, _>>()?;
        drop(stmt);
        drop(conn);

        for (connection_id, tenant_id) in connections {
            for data_type in ["products", "orders", "bills", "legislators", "vote_events", "attendance"] {
                store::enqueue(
                    &self.db,
                    QueueName::Ingest,
                    "Fetch",
                    &serde_json::json!({ "connection_id": connection_id, "data_type": data_type }),
                    EnqueueOptions {
                        dedup_key: Some(format!("{connection_id}:{data_type}")),
                        tenant_id: Some(tenant_id.clone()),
                        ..Default::default()
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Nightly sweep recomputing every legislator's *current* period, same
    /// "bring the live period up to date" intent as `POST /reindex` — not
    /// the per-entity recompute `RecomputeMetricsHandler` does off a bill
    /// movement, which must use that row's own period instead of today's.
    fn enqueue_metrics_recompute_all(&self) -> AppResult<()> {
        let conn = self.db.get()?;
        let mut stmt = conn.prepare("SELECT id, tenant_id FROM legislators")?;
        let legislators: Vec<(i64, String)> =
            stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?.collect::<Result<_, _>>()?;
        drop(stmt);
        drop(conn);

        let period = Utc::now().format("%Y").to_string();
        for (legislator_id, tenant_id) in legislators {
            let entity_key = format!("legislator_metrics:{tenant_id}:{legislator_id}:{period}");
            store::enqueue(
                &self.db,
                QueueName::Metrics,
                "RecomputeMetrics",
                &serde_json::json!({ "entity_key": entity_key }),
                EnqueueOptions { dedup_key: Some(entity_key.clone()), tenant_id: Some(tenant_id), ..Default::default() },
            )?;
        }
        Ok(())
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    #[test]
    fn fresh_schedule_is_due_on_first_check() {
        let pool = connect_in_memory().unwrap();
        let scheduler = Scheduler::new(pool.clone());
        scheduler.maybe_fire(&BUILTIN_SCHEDULES[1]).unwrap();

        let conn = pool.get().unwrap();
        let fired: Option<String> = conn
            .query_row(
                "SELECT last_fired_at FROM schedule_state WHERE schedule_name = ?1",
                params![BUILTIN_SCHEDULES[1].name],
                |r| r.get(0),
            )
            .optional()
            .unwrap();
        assert!(fired.is_some());
    }

    #[test]
    fn second_check_within_the_same_period_does_not_refire() {
        let pool = connect_in_memory().unwrap();
        let scheduler = Scheduler::new(pool.clone());
        scheduler.maybe_fire(&BUILTIN_SCHEDULES[1]).unwrap();
        let conn = pool.get().unwrap();
        let first: String = conn
            .query_row(
                "SELECT last_fired_at FROM schedule_state WHERE schedule_name = ?1",
                params![BUILTIN_SCHEDULES[1].name],
                |r| r.get(0),
            )
            .unwrap();
        drop(conn);

        scheduler.maybe_fire(&BUILTIN_SCHEDULES[1]).unwrap();
        let conn = pool.get().unwrap();
        let second: String = conn
            .query_row(
                "SELECT last_fired_at FROM schedule_state WHERE schedule_name = ?1",
                params![BUILTIN_SCHEDULES[1].name],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(first, second);
    }
}
