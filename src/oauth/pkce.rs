use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::PluginConfig;
use crate::error::{ParError, ParResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    #[serde(rename = "plain")]
    Plain,
    S256,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub challenge: String,
    pub method: CodeChallengeMethod,
}

/// Check `code_challenge` / `code_challenge_method` against plugin policy.
/// The method defaults to `plain` when only a challenge is sent (RFC 7636 §4.3).
pub fn validate_challenge(
    challenge: Option<&str>,
    method: Option<&str>,
    config: &PluginConfig,
) -> ParResult<Option<PkceChallenge>> {
    let Some(challenge) = challenge else {
        if method.is_some() {
            return Err(ParError::MalformedRequest(
                "code_challenge_method without code_challenge".into(),
            ));
        }
        return Ok(None);
    };

    if !config.pkce_allowed {
        return Err(ParError::PolicyViolation("PKCE is disabled".into()));
    }
    let method = match method.unwrap_or("plain") {
        "S256" => CodeChallengeMethod::S256,
        "plain" if config.pkce_method_plain_allowed => CodeChallengeMethod::Plain,
        "plain" => {
            return Err(ParError::PolicyViolation("plain PKCE method not allowed".into()));
        }
        other => {
            return Err(ParError::PolicyViolation(format!(
                "unknown code_challenge_method {}",
                other
            )))
        }
    };
    if !is_pkce_string(challenge) {
        return Err(ParError::MalformedRequest("malformed code_challenge".into()));
    }

    Ok(Some(PkceChallenge {
        challenge: challenge.to_string(),
        method,
    }))
}

/// Does `code_verifier` answer `challenge`?
pub fn verify(code_verifier: &str, challenge: &PkceChallenge) -> bool {
    if !is_pkce_string(code_verifier) {
        return false;
    }
    let computed = match challenge.method {
        CodeChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes())),
        CodeChallengeMethod::Plain => code_verifier.to_string(),
    };
    computed.as_bytes().ct_eq(challenge.challenge.as_bytes()).into()
}

/// 43 to 128 characters from the unreserved set.
fn is_pkce_string(value: &str) -> bool {
    (43..=128).contains(&value.len())
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}
