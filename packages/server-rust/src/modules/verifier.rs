//! Identity verification for token-based providers.
//!
//! A verifier turns provider-issued material into a stable subject id. The
//! accounts module only advertises a token provider when a verifier for it
//! is installed.

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, Engine, GeneralPurpose, GeneralPurposeConfig};
use hmac::{Hmac, Mac};
use linna_core::{GameCenterCredentials, RuntimeError};
use serde::Deserialize;
use sha2::Sha256;

/// Provider material handed to a verifier.
#[derive(Debug, Clone, Copy)]
pub enum ProviderToken<'a> {
    Token(&'a str),
    GameCenter(&'a GameCenterCredentials),
}

/// Result of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VerifiedIdentity {
    /// Provider-scoped id of the player.
    pub subject: String,
    /// Provider-scoped ids of the player's friends, when the provider exposes them.
    pub friend_ids: Vec<String>,
}

#[async_trait]
pub trait ProviderVerifier: Send + Sync {
    /// # Errors
    ///
    /// `Unauthenticated` when the material is invalid, `InvalidArgument`
    /// when it is of the wrong shape for this provider.
    async fn verify(&self, token: ProviderToken<'_>) -> anyhow::Result<VerifiedIdentity>;
}

// ---------------------------------------------------------------------------
// FacebookInstantVerifier
// ---------------------------------------------------------------------------

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Deserialize)]
struct PlayerInfo {
    player_id: String,
}

/// Verifies Facebook Instant Game signed player info locally.
///
/// The material is `<signature>.<payload>`, both base64url. The signature is
/// HMAC-SHA256 of the encoded payload under the app secret; the payload is a
/// JSON object carrying `player_id`.
pub struct FacebookInstantVerifier {
    app_secret: String,
}

impl FacebookInstantVerifier {
    #[must_use]
    pub fn new(app_secret: impl Into<String>) -> Self {
        Self {
            app_secret: app_secret.into(),
        }
    }

    /// Check signed player info and return the player id.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` for any malformed or forged input.
    pub fn player_id(&self, signed_player_info: &str) -> Result<String, RuntimeError> {
        let invalid = || RuntimeError::unauthenticated("Invalid signed player info.");

        let (signature, payload) = signed_player_info.split_once('.').ok_or_else(invalid)?;
        let signature = URL_SAFE_LENIENT.decode(signature).map_err(|_| invalid())?;

        let mut mac = Hmac::<Sha256>::new_from_slice(self.app_secret.as_bytes())
            .map_err(|_| RuntimeError::internal("invalid app secret"))?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid())?;

        let payload = URL_SAFE_LENIENT.decode(payload).map_err(|_| invalid())?;
        let info: PlayerInfo = serde_json::from_slice(&payload).map_err(|_| invalid())?;
        if info.player_id.is_empty() {
            return Err(invalid());
        }
        Ok(info.player_id)
    }

    /// Produce signed player info for `payload`. Used by tests and tooling.
    ///
    /// # Errors
    ///
    /// `Internal` if the secret cannot key the MAC.
    pub fn sign(&self, payload: &serde_json::Value) -> Result<String, RuntimeError> {
        let payload = URL_SAFE_LENIENT.encode(payload.to_string());
        let mut mac = Hmac::<Sha256>::new_from_slice(self.app_secret.as_bytes())
            .map_err(|_| RuntimeError::internal("invalid app secret"))?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_LENIENT.encode(mac.finalize().into_bytes());
        Ok(format!("{signature}.{payload}"))
    }
}

#[async_trait]
impl ProviderVerifier for FacebookInstantVerifier {
    async fn verify(&self, token: ProviderToken<'_>) -> anyhow::Result<VerifiedIdentity> {
        let ProviderToken::Token(signed) = token else {
            return Err(RuntimeError::invalid_argument("expected signed player info").into());
        };
        Ok(VerifiedIdentity {
            subject: self.player_id(signed)?,
            friend_ids: Vec::new(),
        })
    }
}
