use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authz::Role;
use crate::config;

pub mod session;

pub use session::{Session, SessionResolver, UserDirectory, UserRecord};

/// Bearer token payload. Role and tenant are informational; the persisted user
/// record is authoritative when a session is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Id of the platform admin acting as `sub`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imp: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>, role: &Role, tenant_id: Option<String>) -> Self {
        let expiry_hours = config::config().security.jwt_expiry_hours;
        Self::with_ttl(user_id, email, role, tenant_id, hours_ttl(expiry_hours))
    }

    pub fn with_ttl(
        user_id: impl Into<String>,
        email: impl Into<String>,
        role: &Role,
        tenant_id: Option<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        let expires = now.checked_add_signed(ttl).unwrap_or(if ttl < Duration::zero() {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        Self {
            sub: user_id.into(),
            email: email.into(),
            role: role.to_string(),
            tenant_id,
            imp: None,
            exp: expires.timestamp(),
            iat: now.timestamp(),
        }
    }

    pub fn impersonated_by(mut self, admin_id: impl Into<String>) -> Self {
        self.imp = Some(admin_id.into());
        self
    }
}

/// Configured lifetimes saturate rather than overflow.
pub fn hours_ttl(hours: u64) -> Duration {
    i64::try_from(hours).ok().and_then(Duration::try_hours).unwrap_or(Duration::MAX)
}

pub fn minutes_ttl(minutes: u64) -> Duration {
    i64::try_from(minutes).ok().and_then(Duration::try_minutes).unwrap_or(Duration::MAX)
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("Invalid JWT secret")]
    InvalidSecret,
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

pub fn decode_jwt(token: &str, secret: &str) -> Result<Claims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Claims>(token, &decoding_key, &Validation::default())
        .map(|data| data.claims)
        .map_err(|e| JwtError::InvalidToken(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_claims() {
        let claims = Claims::new("u-1", "crew@y1.test", &Role::Crew, Some("Y1".to_string()));
        let token = generate_jwt(&claims, "secret").unwrap();
        assert_eq!(decode_jwt(&token, "secret").unwrap(), claims);
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let claims = Claims::new("u-1", "crew@y1.test", &Role::Crew, None);
        let token = generate_jwt(&claims, "secret").unwrap();
        assert!(matches!(decode_jwt(&token, "other"), Err(JwtError::InvalidToken(_))));

        let expired = Claims::with_ttl("u-1", "crew@y1.test", &Role::Crew, None, Duration::hours(-2));
        let token = generate_jwt(&expired, "secret").unwrap();
        assert!(decode_jwt(&token, "secret").is_err());
    }

    #[test]
    fn oversized_lifetimes_saturate() {
        assert_eq!(hours_ttl(24), Duration::hours(24));
        assert_eq!(minutes_ttl(30), Duration::minutes(30));
        assert_eq!(hours_ttl(u64::MAX), Duration::MAX);
        assert_eq!(minutes_ttl(u64::MAX), Duration::MAX);

        let far = Claims::with_ttl("u-1", "crew@y1.test", &Role::Crew, None, hours_ttl(u64::MAX));
        assert_eq!(far.exp, DateTime::<Utc>::MAX_UTC.timestamp());
        let past = Claims::with_ttl("u-1", "crew@y1.test", &Role::Crew, None, Duration::MIN);
        assert_eq!(past.exp, DateTime::<Utc>::MIN_UTC.timestamp());
    }

    #[test]
    fn empty_secret_is_refused() {
        let claims = Claims::new("u-1", "a@b.c", &Role::Owner, None);
        assert!(matches!(generate_jwt(&claims, ""), Err(JwtError::InvalidSecret)));
    }

    #[test]
    fn impersonation_claim_is_optional_on_the_wire() {
        let claims = Claims::new("u-2", "crew@y1.test", &Role::Crew, Some("Y1".to_string()));
        let json = serde_json::to_value(&claims).unwrap();
        assert!(json.get("imp").is_none());

        let imp = claims.impersonated_by("admin-1");
        let token = generate_jwt(&imp, "secret").unwrap();
        assert_eq!(decode_jwt(&token, "secret").unwrap().imp.as_deref(), Some("admin-1"));
    }
}
