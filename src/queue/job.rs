//! Job handler contract.
//!
//! Grounded on the `other_examples` dog-queue crate's `Job` trait
//! (type-safe handlers with a compile-time job name, tenant-scoped
//! context) adapted to this repo's `AppError` taxonomy instead of an
//! associated error type — the engine has exactly one error enum, so a
//! generic associated error type would be needless ceremony.

use crate::db::DbPool;
use crate::error::AppResult;
use async_trait::async_trait;
use std::time::Duration;

/// Shared context every job handler runs with. Cheap to clone — everything
/// inside is `Arc`-backed or a plain pool handle.
#[derive(Clone)]
pub struct JobCtx {
    pub db: DbPool,
    pub tenant_id: Option<String>,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Name this handler is registered under; must match the `job_name`
    /// used at `enqueue` time.
    fn job_name(&self) -> &'static str;

    /// Soft deadline for one invocation (§5: 5 min ingest / 30 s normalize
    /// / 60 s metrics, by queue).
    fn deadline(&self) -> Duration;

    async fn handle(&self, payload: serde_json::Value, ctx: &JobCtx) -> AppResult<()>;
}
