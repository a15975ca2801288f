//! JWT issuance and validation, adapted from the teacher's
//! `auth/jwt.rs::JwtHandler` — same header/validation call shape, claims
//! carry a tenant id instead of a role.

use crate::error::{AppError, AppResult};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

pub struct JwtHandler {
    secret: String,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self { secret, expiration_hours: 24 * 7 }
    }

    pub fn generate_token(&self, tenant_id: &str, email: &str) -> AppResult<String> {
        let expiration = Utc::now()
            .checked_add_signed(chrono::Duration::hours(self.expiration_hours))
            .ok_or_else(|| AppError::Internal("invalid token expiration".into()))?
            .timestamp() as usize;

        let claims = Claims { sub: tenant_id.to_string(), email: email.to_string(), exp: expiration };

        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|e| AppError::Internal(format!("failed to sign jwt: {e}")))
    }

    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| AppError::Auth(format!("invalid or expired token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_token() {
        let handler = JwtHandler::new("test-secret".to_string());
        let token = handler.generate_token("t1", "a@example.com").unwrap();
        let claims = handler.validate_token(&token).unwrap();
        assert_eq!(claims.sub, "t1");
        assert_eq!(claims.email, "a@example.com");
    }

    #[test]
    fn wrong_secret_rejects() {
        let a = JwtHandler::new("secret-a".to_string());
        let b = JwtHandler::new("secret-b".to_string());
        let token = a.generate_token("t1", "a@example.com").unwrap();
        assert!(b.validate_token(&token).is_err());
    }
}
