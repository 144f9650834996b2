//! Utility functions available to module code: identifiers, encodings,
//! hashing, token signing, events and custom metrics.
//!
//! Every fallible helper reports bad input as an `InvalidArgument`
//! [`RuntimeError`] so an RPC handler can return it with `?` unchanged.

mod crypto;
mod http;

pub use crypto::{
    aes128_decrypt, aes128_encrypt, aes256_decrypt, aes256_encrypt, bcrypt_compare, bcrypt_hash,
    bcrypt_hash_with_cost, md5_hash, rsa_sha256_hash, BCRYPT_DEFAULT_COST,
};
pub use http::{http_request, HttpMethod, HttpResponse, DEFAULT_HTTP_TIMEOUT_MS};

use std::collections::HashMap;
use std::time::Duration;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use sha2::{Digest, Sha256};

use crate::error::RuntimeError;

const fn engine(alphabet: &'static alphabet::Alphabet, pad: bool) -> GeneralPurpose {
    GeneralPurpose::new(
        alphabet,
        GeneralPurposeConfig::new()
            .with_encode_padding(pad)
            .with_decode_padding_mode(DecodePaddingMode::Indifferent),
    )
}

const STANDARD_PAD: GeneralPurpose = engine(&alphabet::STANDARD, true);
const STANDARD_NO_PAD: GeneralPurpose = engine(&alphabet::STANDARD, false);
const URL_PAD: GeneralPurpose = engine(&alphabet::URL_SAFE, true);
const URL_NO_PAD: GeneralPurpose = engine(&alphabet::URL_SAFE, false);

/// New random UUID v4 in hyphenated form.
#[must_use]
pub fn uuid_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[must_use]
pub fn base64_encode(input: &str, padding: bool) -> String {
    if padding {
        STANDARD_PAD.encode(input)
    } else {
        STANDARD_NO_PAD.encode(input)
    }
}

/// Decode standard base64, with or without padding.
///
/// # Errors
///
/// `InvalidArgument` if the input is not base64 or not UTF-8 once decoded.
pub fn base64_decode(input: &str) -> Result<String, RuntimeError> {
    let bytes = STANDARD_PAD
        .decode(input)
        .map_err(|e| RuntimeError::invalid_argument(format!("invalid base64 input: {e}")))?;
    utf8(bytes)
}

#[must_use]
pub fn base64_url_encode(input: &str, padding: bool) -> String {
    if padding {
        URL_PAD.encode(input)
    } else {
        URL_NO_PAD.encode(input)
    }
}

/// Decode URL-safe base64, with or without padding.
///
/// # Errors
///
/// `InvalidArgument` if the input is not base64url or not UTF-8 once decoded.
pub fn base64_url_decode(input: &str) -> Result<String, RuntimeError> {
    let bytes = URL_PAD
        .decode(input)
        .map_err(|e| RuntimeError::invalid_argument(format!("invalid base64url input: {e}")))?;
    utf8(bytes)
}

#[must_use]
pub fn base16_encode(input: &str) -> String {
    hex::encode(input)
}

/// # Errors
///
/// `InvalidArgument` if the input is not hex or not UTF-8 once decoded.
pub fn base16_decode(input: &str) -> Result<String, RuntimeError> {
    let bytes = hex::decode(input)
        .map_err(|e| RuntimeError::invalid_argument(format!("invalid base16 input: {e}")))?;
    utf8(bytes)
}

fn utf8(bytes: Vec<u8>) -> Result<String, RuntimeError> {
    String::from_utf8(bytes)
        .map_err(|_| RuntimeError::invalid_argument("decoded data is not valid UTF-8"))
}

/// Interpret binary data as UTF-8 text.
///
/// # Errors
///
/// `InvalidArgument` if `data` is not valid UTF-8.
pub fn binary_to_string(data: &[u8]) -> Result<String, RuntimeError> {
    std::str::from_utf8(data)
        .map(str::to_string)
        .map_err(|e| RuntimeError::invalid_argument(format!("data is not valid UTF-8: {e}")))
}

#[must_use]
pub fn string_to_binary(input: &str) -> Vec<u8> {
    input.as_bytes().to_vec()
}

/// Lowercase hex SHA-256 digest.
#[must_use]
pub fn sha256_hash(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Lowercase hex HMAC-SHA256 of `input` keyed by `key`.
///
/// # Errors
///
/// `InvalidArgument` if the key is rejected.
pub fn hmac_sha256_hash(input: &str, key: &str) -> Result<String, RuntimeError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| RuntimeError::invalid_argument(format!("invalid hmac key: {e}")))?;
    mac.update(input.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Signing algorithms accepted by [`jwt_generate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtAlgorithm {
    Hs256,
    Rs256,
}

impl std::str::FromStr for JwtAlgorithm {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(JwtAlgorithm::Hs256),
            "RS256" => Ok(JwtAlgorithm::Rs256),
            other => Err(RuntimeError::invalid_argument(format!(
                "unsupported jwt algorithm: {other}"
            ))),
        }
    }
}

/// Sign `claims` as a compact JWT. `signing_key` is the shared secret for
/// HS256 and a PEM private key for RS256.
///
/// # Errors
///
/// `InvalidArgument` for an unreadable key or unserializable claims.
pub fn jwt_generate(
    algorithm: JwtAlgorithm,
    signing_key: &str,
    claims: &serde_json::Map<String, serde_json::Value>,
) -> Result<String, RuntimeError> {
    let (alg, key) = match algorithm {
        JwtAlgorithm::Hs256 => (Algorithm::HS256, EncodingKey::from_secret(signing_key.as_bytes())),
        JwtAlgorithm::Rs256 => (
            Algorithm::RS256,
            EncodingKey::from_rsa_pem(signing_key.as_bytes())
                .map_err(|e| RuntimeError::invalid_argument(format!("invalid rsa key: {e}")))?,
        ),
    };
    jsonwebtoken::encode(&Header::new(alg), claims, &key)
        .map_err(|e| RuntimeError::invalid_argument(format!("failed to sign jwt: {e}")))
}

/// Emit a named analytics event into the host's log stream.
pub fn event(name: &str, properties: &HashMap<String, String>, timestamp: Option<i64>, external: bool) {
    tracing::info!(
        target: "linna::event",
        name,
        properties = ?properties,
        timestamp,
        external,
        "event"
    );
}

fn labels(tags: &HashMap<String, String>) -> Vec<metrics::Label> {
    tags.iter()
        .map(|(k, v)| metrics::Label::new(k.clone(), v.clone()))
        .collect()
}

pub fn metrics_counter_add(name: &str, tags: &HashMap<String, String>, delta: u64) {
    metrics::counter!(name.to_string(), labels(tags)).increment(delta);
}

pub fn metrics_gauge_set(name: &str, tags: &HashMap<String, String>, value: f64) {
    metrics::gauge!(name.to_string(), labels(tags)).set(value);
}

/// Record a duration given in nanoseconds.
pub fn metrics_timer_record(name: &str, tags: &HashMap<String, String>, nanos: u64) {
    metrics::histogram!(name.to_string(), labels(tags)).record(Duration::from_nanos(nanos));
}
