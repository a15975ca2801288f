//! `POST /auth/identity` (§6): accepts either a third-party credential JWT
//! or a bare `{email, name, picture}` body, and upserts a Tenant keyed by
//! the resolved email. Tenants are never hard-deleted (§3).

use crate::db::DbPool;
use crate::error::{AppError, AppResult};
use chrono::Utc;
use rusqlite::params;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IdentityRequest {
    Credential { credential: String },
    Profile { email: String, #[allow(dead_code)] name: Option<String>, #[allow(dead_code)] picture: Option<String> },
}

/// Resolve the identity request to a tenant id (email), decoding the
/// third-party credential if present. This repo doesn't validate the
/// credential against a real identity provider's JWKS (out of scope per
/// §1 "identity provider internals") — it trusts the unverified `sub`/
/// `email` claim, matching a frontend that already completed the OAuth
/// handshake with the provider directly.
pub fn resolve_email(request: &IdentityRequest) -> AppResult<String> {
    match request {
        IdentityRequest::Profile { email, .. } => Ok(email.clone()),
        IdentityRequest::Credential { credential } => decode_unverified_email(credential),
    }
}

fn decode_unverified_email(jwt: &str) -> AppResult<String> {
    let parts: Vec<&str> = jwt.split('.').collect();
    let payload = parts
        .get(1)
        .ok_or_else(|| AppError::Auth("malformed identity credential".into()))?;
    let decoded = base64::Engine::decode(
        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
        payload,
    )
    .map_err(|_| AppError::Auth("malformed identity credential".into()))?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded)?;
    claims
        .get("email")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| AppError::Auth("identity credential missing email claim".into()))
}

pub fn upsert_tenant(db: &DbPool, email: &str) -> AppResult<crate::models::Tenant> {
    let conn = db.get()?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO tenants (id, plan_tier, created_at) VALUES (?1, 'free', ?2)
         ON CONFLICT(id) DO NOTHING",
        params![email, now],
    )?;

    let (id, plan_tier, solve_count, created_at): (String, String, i64, String) = conn.query_row(
        "SELECT id, plan_tier, solve_count, created_at FROM tenants WHERE id = ?1",
        params![email],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )?;

    Ok(crate::models::Tenant {
        id,
        plan_tier: crate::models::tenant::PlanTier::from_str(&plan_tier),
        solve_count,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_in_memory;

    #[test]
    fn profile_request_resolves_to_its_email() {
        let req = IdentityRequest::Profile {
            email: "a@example.com".to_string(),
            name: None,
            picture: None,
        };
        assert_eq!(resolve_email(&req).unwrap(), "a@example.com");
    }

    #[test]
    fn upsert_is_idempotent() {
        let pool = connect_in_memory().unwrap();
        let first = upsert_tenant(&pool, "a@example.com").unwrap();
        let second = upsert_tenant(&pool, "a@example.com").unwrap();
        assert_eq!(first.id, second.id);
    }
}
