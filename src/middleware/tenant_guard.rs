//! Multi-tenancy enforcement (§5 "Multi-tenancy").
//!
//! SQLite has no row-level security, so there is no database-level backstop
//! to lean on. What's enforced here is cryptographic, not conventional: an
//! Axum middleware (`enforce_tenant_auth`) runs in front of every
//! tenant-scoped route, verifies the caller's bearer token against
//! `JwtHandler::validate_token`, and rejects the request outright before any
//! handler body runs if the token is missing, malformed, or fails
//! verification. A handler can no longer be reached with a tenant id that
//! didn't come from a signed token — there is nothing left for a forgetful
//! handler to skip.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::AppState;
use crate::error::{AppError, AppResult};

/// Tenant id resolved from a verified bearer token. Inserted into the
/// request's extensions by `enforce_tenant_auth`; handlers pull it back out
/// with the `Extension<VerifiedTenant>` extractor instead of reading any
/// client-supplied header themselves.
#[derive(Debug, Clone)]
pub struct VerifiedTenant(pub String);

/// Rejects any request to a protected route that doesn't carry a valid
/// `Authorization: Bearer <jwt>` header signed by this server's
/// `JwtHandler` (the token `POST /auth/identity` issues). On success,
/// records the verified tenant id as a request extension for the handler
/// to extract; on failure, the handler never runs at all.
pub async fn enforce_tenant_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    match verify_bearer(&state, req.headers()) {
        Ok(tenant_id) => {
            req.extensions_mut().insert(VerifiedTenant(tenant_id));
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

fn verify_bearer(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Auth("missing bearer token".into()))?;

    state.jwt.validate_token(token).map(|claims| claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtHandler;
    use axum::http::HeaderValue;

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn missing_header_is_rejected() {
        let jwt = JwtHandler::new("secret".to_string());
        let token = jwt.generate_token("t1", "a@example.com").unwrap();
        // sanity: the token itself is valid, only the header is missing below
        assert!(jwt.validate_token(&token).is_ok());
        assert!(verify_bearer_with(&jwt, &HeaderMap::new()).is_err());
    }

    #[test]
    fn valid_token_resolves_to_its_tenant_id() {
        let jwt = JwtHandler::new("secret".to_string());
        let token = jwt.generate_token("t1", "a@example.com").unwrap();
        assert_eq!(verify_bearer_with(&jwt, &headers_with_bearer(&token)).unwrap(), "t1");
    }

    #[test]
    fn forged_token_is_rejected() {
        let issuer = JwtHandler::new("secret-a".to_string());
        let verifier = JwtHandler::new("secret-b".to_string());
        let token = issuer.generate_token("t1", "a@example.com").unwrap();
        assert!(verify_bearer_with(&verifier, &headers_with_bearer(&token)).is_err());
    }

    // `verify_bearer` takes `&AppState` to reach `state.jwt`; these tests
    // only need the `JwtHandler` half of that, so they exercise the same
    // header-parsing/validation logic directly against the handler.
    fn verify_bearer_with(jwt: &JwtHandler, headers: &HeaderMap) -> AppResult<String> {
        let token = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::Auth("missing bearer token".into()))?;
        jwt.validate_token(token).map(|claims| claims.sub)
    }
}
