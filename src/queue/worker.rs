//! Worker pool — one per named queue, each with its own concurrency cap.
//!
//! Grounded on the teacher's `main.rs` pattern of spawning long-lived
//! `tokio::spawn` loops from `main`, one per subsystem.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::db::DbPool;
use crate::queue::job::{JobCtx, JobHandler};
use crate::queue::store::{self, QueueName};

pub struct QueueWorkerPool {
    db: DbPool,
    queue: QueueName,
    concurrency: usize,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
}

impl QueueWorkerPool {
    pub fn new(db: DbPool, queue: QueueName, concurrency: usize) -> Self {
        Self {
            db,
            queue,
            concurrency,
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_name(), handler);
    }

    /// Poll forever. Within one pool a worker processes one job at a time
    /// to completion, but the pool itself runs up to `concurrency` workers
    /// concurrently (§5 "Scheduling model").
    pub async fn run(self) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let handlers = Arc::new(self.handlers);
        let db = self.db;
        let queue = self.queue;

        loop {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let claimed = match store::claim_next(&db, queue) {
                Ok(job) => job,
                Err(e) => {
                    error!(queue = queue.as_str(), error = %e, "failed to poll queue");
                    drop(permit);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            let Some(job) = claimed else {
                drop(permit);
                tokio::time::sleep(Duration::from_millis(250)).await;
                continue;
            };

            let handlers = handlers.clone();
            let db = db.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let Some(handler) = handlers.get(job.job_name.as_str()).cloned() else {
                    warn!(job_name = %job.job_name, "no handler registered for job");
                    let _ = store::mark_failed(&db, &job, false);
                    return;
                };

                let ctx = JobCtx {
                    db: db.clone(),
                    tenant_id: job.tenant_id.clone(),
                };
                let deadline = handler.deadline();
                let outcome =
                    tokio::time::timeout(deadline, handler.handle(job.payload.clone(), &ctx)).await;

                match outcome {
                    Ok(Ok(())) => {
                        if let Err(e) = store::mark_complete(&db, job.id) {
                            error!(job_id = job.id, error = %e, "failed to mark job complete");
                        }
                    }
                    Ok(Err(e)) => {
                        warn!(job_id = job.id, job_name = %job.job_name, error = %e, "job failed");
                        let _ = store::mark_failed(&db, &job, e.is_retryable());
                    }
                    Err(_) => {
                        warn!(job_id = job.id, job_name = %job.job_name, "job exceeded soft deadline");
                        let _ = store::return_to_pending(&db, job.id);
                    }
                }
            });
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        info!(queue = self.queue.as_str(), concurrency = self.concurrency, "starting queue worker pool");
        tokio::spawn(self.run())
    }
}
