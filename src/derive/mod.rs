//! Derived-State Engine (C6, §4.6)
//! Mission: recompute per-tenant/per-entity aggregates from current raw
//! state. Both engines are pure functions of the database's current
//! contents — no mutation of the raw tables they read.

pub mod analysis;
pub mod metrics;
