//! Identity & JWT handling (Glue, §6 "`POST /auth/identity`").

pub mod identity;
pub mod jwt;

pub use jwt::{Claims, JwtHandler};
