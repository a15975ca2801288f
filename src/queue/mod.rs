//! Job Queue (C2)
//! Mission: durable, named queues with exponential-backoff retry and
//! dead-letter routing. Handlers MUST be idempotent (§3 upsert key is the
//! only idempotency key the system relies on).

pub mod handlers;
pub mod job;
pub mod store;
pub mod worker;

pub use job::{JobCtx, JobHandler};
pub use store::{EnqueueOptions, QueueName};
pub use worker::QueueWorkerPool;
