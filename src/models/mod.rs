//! Data model
//! Mission: typed records for every entity in the engine, with explicit
//! optional fields — no `any`-typed payload passthrough.

pub mod analysis;
pub mod commerce;
pub mod connection;
pub mod feed;
pub mod ingestion_run;
pub mod legislative;
pub mod metrics;
pub mod sourceref;
pub mod tenant;

pub use analysis::Analysis;
pub use commerce::{InventoryLevel, Order, Product};
pub use connection::{Connection, SyncStatus};
pub use feed::FeedPost;
pub use ingestion_run::{IngestionRun, RunStatus};
pub use legislative::{
    Attendance, AttendanceStatus, Bill, BillAuthor, BillMovement, BillStatus, Commission,
    Legislator, Session, Vote, VoteEvent, VoteResult,
};
pub use metrics::LegislatorMetric;
pub use sourceref::SourceRef;
pub use tenant::{PlanTier, Tenant};
