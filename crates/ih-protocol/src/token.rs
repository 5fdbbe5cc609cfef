//! Shared Access Signature (SAS) token generation.
//!
//! A token grants time-limited access to one resource URI:
//! ```text
//! SharedAccessSignature sig={urlenc(base64(hmac_sha256(key, urlenc(uri) + "\n" + expiry)))}&se={expiry}&sr={urlenc(uri)}
//! ```
//! `key` is the base64-decoded device secret and `expiry` is in Unix seconds.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Characters left unescaped in token fields.
const URL_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'*')
    .remove(b'(')
    .remove(b')');

/// Errors raised while building a signed token.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid shared access key: {0}")]
    InvalidKey(String),
}

/// Convenience alias for token results.
pub type TokenResult<T> = Result<T, TokenError>;

/// Decoded device secret used to key the token HMAC.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedAccessKey(Vec<u8>);

impl SharedAccessKey {
    /// Decode a base64 device key.
    pub fn from_base64(key: &str) -> TokenResult<Self> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|e| TokenError::InvalidKey(e.to_string()))?;
        if bytes.is_empty() {
            return Err(TokenError::InvalidKey("key is empty".into()));
        }
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SharedAccessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedAccessKey(..)")
    }
}

/// A signed SAS token. Regenerated on every renewal, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    /// Base64 HMAC-SHA256 digest (not yet URL-encoded).
    pub signature: String,
    /// Expiry in Unix seconds.
    pub expiry: i64,
    /// Resource URI the token grants access to.
    pub audience: String,
}

impl SignedToken {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expiry, 0).single()
    }

    /// Whether the token is still valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() < self.expiry
    }
}

impl std::fmt::Display for SignedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SharedAccessSignature sig={}&se={}&sr={}",
            url_encode(&self.signature),
            self.expiry,
            url_encode(&self.audience)
        )
    }
}

/// Percent-encode a token field. Escapes use uppercase hex and a space
/// becomes `%20`.
pub fn url_encode(input: &str) -> String {
    utf8_percent_encode(input, URL_ENCODE_SET).to_string()
}

/// Sign a token for `request_uri` valid for `ttl` from the current time.
pub fn sign(
    key: &SharedAccessKey,
    request_uri: &str,
    ttl: Duration,
) -> TokenResult<SignedToken> {
    sign_at(key, request_uri, ttl, Utc::now())
}

/// Sign a token for `request_uri` valid for `ttl` from `now`.
///
/// Deterministic for a fixed `now`. Any key length is accepted; the error
/// path only surfaces a rejection from the MAC backend.
pub fn sign_at(
    key: &SharedAccessKey,
    request_uri: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> TokenResult<SignedToken> {
    let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    let expiry = now.timestamp().saturating_add(ttl_secs);
    let string_to_sign = format!("{}\n{expiry}", url_encode(request_uri));

    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| TokenError::InvalidKey(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(SignedToken {
        signature,
        expiry,
        audience: request_uri.to_string(),
    })
}

/// Decode a base64 secret and produce the token string in one step.
pub fn sign_with_base64_key(key: &str, request_uri: &str, ttl: Duration) -> TokenResult<String> {
    let key = SharedAccessKey::from_base64(key)?;
    Ok(sign(&key, request_uri, ttl)?.to_string())
}
