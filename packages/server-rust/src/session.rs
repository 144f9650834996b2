//! Session token minting and verification.
//!
//! Sessions are HS256 JWTs signed with the configured session key. Their
//! format is host-owned; modules only ever see the resulting context keys.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use linna_core::{RuntimeError, SessionToken};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Session id.
    pub tid: String,
    /// User id.
    pub uid: String,
    /// Username.
    pub usn: String,
    /// Session variables.
    #[serde(default)]
    pub vrs: HashMap<String, String>,
    pub exp: i64,
    pub iat: i64,
}

/// Signs and verifies session tokens.
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    default_expiry_secs: i64,
}

impl SessionIssuer {
    /// `default_expiry_secs` is clamped to at least one second.
    #[must_use]
    pub fn new(key: &str, default_expiry_secs: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(key.as_bytes()),
            decoding: DecodingKey::from_secret(key.as_bytes()),
            default_expiry_secs: default_expiry_secs.max(1),
        }
    }

    #[must_use]
    pub fn default_expiry_secs(&self) -> i64 {
        self.default_expiry_secs
    }

    /// Mint a session expiring `expiry` seconds from now, or after the
    /// default lifetime when `expiry <= 0`.
    ///
    /// # Errors
    ///
    /// `Internal` if signing fails.
    pub fn issue(
        &self,
        user_id: &str,
        username: &str,
        expiry: i64,
        vars: &HashMap<String, String>,
    ) -> Result<SessionToken, RuntimeError> {
        self.issue_at(unix_now(), user_id, username, expiry, vars)
    }

    /// Same as [`issue`](Self::issue) with an explicit issue time.
    ///
    /// # Errors
    ///
    /// `Internal` if signing fails.
    pub fn issue_at(
        &self,
        now: i64,
        user_id: &str,
        username: &str,
        expiry: i64,
        vars: &HashMap<String, String>,
    ) -> Result<SessionToken, RuntimeError> {
        let lifetime = if expiry <= 0 {
            self.default_expiry_secs
        } else {
            expiry
        };
        let claims = SessionClaims {
            tid: uuid::Uuid::new_v4().to_string(),
            uid: user_id.to_string(),
            usn: username.to_string(),
            vrs: vars.clone(),
            exp: now.saturating_add(lifetime),
            iat: now,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| {
                tracing::error!(error = %e, "failed to sign session token");
                RuntimeError::internal("failed to generate session")
            })?;
        Ok(SessionToken {
            token,
            expires_at: claims.exp,
        })
    }

    /// Verify signature and expiry.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` for malformed, tampered, or expired tokens.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, RuntimeError> {
        let validation = Validation::new(Algorithm::HS256);
        jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| RuntimeError::unauthenticated("Auth token invalid"))
    }
}

#[allow(clippy::cast_possible_wrap)]
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use linna_core::StatusCode;

    use super::*;

    fn issuer() -> SessionIssuer {
        SessionIssuer::new("test-key", 3600)
    }

    #[test]
    fn non_positive_expiry_uses_default() {
        let now = unix_now();
        for expiry in [0, -5] {
            let session = issuer().issue_at(now, "u", "n", expiry, &HashMap::new()).unwrap();
            assert_eq!(session.expires_at, now + 3600);
        }
    }

    #[test]
    fn positive_expiry_is_relative() {
        let now = unix_now();
        let session = issuer().issue_at(now, "u", "n", 60, &HashMap::new()).unwrap();
        assert_eq!(session.expires_at, now + 60);
    }

    #[test]
    fn verify_returns_claims_with_vars() {
        let mut vars = HashMap::new();
        vars.insert("tier".to_string(), "gold".to_string());
        let issuer = issuer();
        let session = issuer.issue("user-1", "alice", 0, &vars).unwrap();

        let claims = issuer.verify(&session.token).unwrap();
        assert_eq!(claims.uid, "user-1");
        assert_eq!(claims.usn, "alice");
        assert_eq!(claims.vrs, vars);
        assert_eq!(claims.exp, session.expires_at);
        assert_eq!(claims.tid.len(), 36);
    }

    #[test]
    fn wrong_key_is_unauthenticated() {
        let session = issuer().issue("u", "n", 0, &HashMap::new()).unwrap();
        let other = SessionIssuer::new("other-key", 3600);
        let err = other.verify(&session.token).unwrap_err();
        assert_eq!(err.status(), StatusCode::Unauthenticated);
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = issuer();
        let session = issuer
            .issue_at(unix_now() - 10_000, "u", "n", 1, &HashMap::new())
            .unwrap();
        assert!(issuer.verify(&session.token).is_err());
    }

    #[test]
    fn default_expiry_is_clamped() {
        assert_eq!(SessionIssuer::new("k", 0).default_expiry_secs(), 1);
    }
}
