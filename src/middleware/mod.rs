//! Glue middleware (§5 "Multi-tenancy", §4.4 "Rate-limit policy").

pub mod rate_limit;
pub mod tenant_guard;

pub use rate_limit::ConnectionRateLimiter;
pub use tenant_guard::{enforce_tenant_auth, VerifiedTenant};
