//! Compact JOSE handling for request objects and client assertions.
//!
//! Classification is decided from the segment count and the protected
//! header alone:
//!
//! - 3 segments, `alg` without `enc` -> JWS
//! - 5 segments, `alg` with `enc`    -> JWE
//!
//! Anything else is malformed. A JWE payload is either a JSON claim set or a
//! compact JWS (sign-then-encrypt).

pub mod jwe;
pub mod jws;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum JoseError {
    #[error("Malformed token: {0}")]
    Malformed(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("No usable key: {0}")]
    KeyUnavailable(String),

    #[error("Signature verification failed: {0}")]
    Signature(String),

    #[error("Decryption failed")]
    Decryption,

    #[error("Token expired")]
    Expired,
}

/// The protected header fields this crate looks at.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoseHeader {
    pub alg: String,
    #[serde(default)]
    pub enc: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
}

/// Which layers a request object was wrapped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    Signed,
    Encrypted,
    /// Signed, then encrypted.
    Nested,
}

impl Envelope {
    pub fn is_signed(&self) -> bool {
        matches!(self, Envelope::Signed | Envelope::Nested)
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Envelope::Encrypted | Envelope::Nested)
    }
}

/// Which key verified a signature or unwrapped a content key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyIdentity {
    ClientSecret { client_id: String },
    ClientJwk { client_id: String, kid: Option<String> },
    ClientPem { client_id: String },
    ServerKey,
}

impl KeyIdentity {
    pub fn is_symmetric(&self) -> bool {
        matches!(self, KeyIdentity::ClientSecret { .. })
    }

    pub fn client_id(&self) -> Option<&str> {
        match self {
            KeyIdentity::ClientSecret { client_id }
            | KeyIdentity::ClientJwk { client_id, .. }
            | KeyIdentity::ClientPem { client_id } => Some(client_id),
            KeyIdentity::ServerKey => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Compact serialization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Jws {
    pub header: JoseHeader,
    raw: String,
}

impl Jws {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Claims read without checking the signature, only to find out whose key
    /// should check it.
    pub fn unverified_claims(&self) -> Result<Map<String, Value>, JoseError> {
        let payload = self
            .raw
            .split('.')
            .nth(1)
            .ok_or_else(|| JoseError::Malformed("missing payload".into()))?;
        decode_json_segment(payload)
    }
}

#[derive(Debug, Clone)]
pub struct Jwe {
    pub header: JoseHeader,
    protected: String,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

impl Jwe {
    /// `dir` content keys are derived from the client secret.
    pub fn uses_shared_secret(&self) -> bool {
        self.header.alg == "dir"
    }
}

#[derive(Debug, Clone)]
pub enum CompactToken {
    Signed(Jws),
    Encrypted(Jwe),
}

impl CompactToken {
    pub fn parse(raw: &str) -> Result<Self, JoseError> {
        let raw = raw.trim();
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 && segments.len() != 5 {
            return Err(JoseError::Malformed(format!(
                "{} segments in compact token",
                segments.len()
            )));
        }

        let header: JoseHeader = serde_json::from_slice(&b64_decode(segments[0])?)
            .map_err(|e| JoseError::Malformed(format!("header: {}", e)))?;

        match (segments.len(), header.enc.is_some()) {
            (3, false) => {
                if header.alg.eq_ignore_ascii_case("none") {
                    return Err(JoseError::UnsupportedAlgorithm("none".into()));
                }
                Ok(CompactToken::Signed(Jws {
                    header,
                    raw: raw.to_string(),
                }))
            }
            (5, true) => Ok(CompactToken::Encrypted(Jwe {
                header,
                protected: segments[0].to_string(),
                encrypted_key: b64_decode(segments[1])?,
                iv: b64_decode(segments[2])?,
                ciphertext: b64_decode(segments[3])?,
                tag: b64_decode(segments[4])?,
            })),
            _ => Err(JoseError::Malformed(
                "header does not match segment count".into(),
            )),
        }
    }
}

pub(crate) fn b64_decode(segment: &str) -> Result<Vec<u8>, JoseError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| JoseError::Malformed(format!("base64url: {}", e)))
}

fn decode_json_segment(segment: &str) -> Result<Map<String, Value>, JoseError> {
    let bytes = b64_decode(segment)?;
    serde_json::from_slice(&bytes).map_err(|e| JoseError::Malformed(format!("json: {}", e)))
}

/// `exp`, when present, must be a number in the future.
pub fn check_expiry(claims: &Map<String, Value>, now: i64) -> Result<(), JoseError> {
    match claims.get("exp") {
        None => Ok(()),
        Some(exp) => match exp.as_i64() {
            Some(exp) if exp > now => Ok(()),
            Some(_) => Err(JoseError::Expired),
            None => Err(JoseError::Malformed("exp is not a number".into())),
        },
    }
}
