use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::pkce::PkceChallenge;
use super::rar::{self, AuthorizationDetail};
use crate::error::{ParError, ParResult};

pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

// ---------------------------------------------------------------------------
// Authorization request parameters
// ---------------------------------------------------------------------------

/// The flat parameter bag of an authorization request, whether it arrived as
/// form fields, query parameters or request object claims.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_details: Option<Vec<AuthorizationDetail>>,
    /// Every other parameter, passed through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl AuthorizationParameters {
    /// Split a name/value bag into known fields. Empty values count as absent.
    pub fn from_bag(mut bag: BTreeMap<String, String>) -> ParResult<Self> {
        let mut take = |name: &str| bag.remove(name).filter(|v| !v.is_empty());

        let response_type = take("response_type");
        let client_id = take("client_id");
        let redirect_uri = take("redirect_uri");
        let scope = take("scope");
        let state = take("state");
        let nonce = take("nonce");
        let code_challenge = take("code_challenge");
        let code_challenge_method = take("code_challenge_method");
        let authorization_details = match take("authorization_details") {
            Some(text) => Some(rar::parse_details(&text)?),
            None => None,
        };

        Ok(Self {
            response_type,
            client_id,
            redirect_uri,
            scope,
            state,
            nonce,
            code_challenge,
            code_challenge_method,
            authorization_details,
            extra: bag,
        })
    }

    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Code,
    Token,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Code => "code",
            ResponseType::Token => "token",
        }
    }
}

/// Parse a space-separated `response_type`. ID token flows are not served here.
pub fn parse_response_types(value: &str) -> ParResult<BTreeSet<ResponseType>> {
    let mut types = BTreeSet::new();
    for part in value.split_whitespace() {
        let parsed = match part {
            "code" => ResponseType::Code,
            "token" => ResponseType::Token,
            other => {
                return Err(ParError::PolicyViolation(format!(
                    "unsupported response_type {}",
                    other
                )))
            }
        };
        types.insert(parsed);
    }
    if types.is_empty() {
        return Err(ParError::MalformedRequest("empty response_type".into()));
    }
    Ok(types)
}

// ---------------------------------------------------------------------------
// Validated request
// ---------------------------------------------------------------------------

/// An authorization request that passed every check. `parameters.redirect_uri`
/// is always set, implied from registration when the caller omitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_types: BTreeSet<ResponseType>,
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkce: Option<PkceChallenge>,
    pub parameters: AuthorizationParameters,
}

impl ValidatedRequest {
    pub fn wants_token(&self) -> bool {
        self.response_types.contains(&ResponseType::Token)
    }

    pub fn wants_code(&self) -> bool {
        self.response_types.contains(&ResponseType::Code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn known_fields_are_lifted() {
        let params = AuthorizationParameters::from_bag(bag(&[
            ("response_type", "code token"),
            ("client_id", "client1_id"),
            ("scope", "g_profile openid"),
            ("state", "xyzabcd"),
            ("g_continue", ""),
            ("prompt", "login"),
        ]))
        .unwrap();

        assert_eq!(params.client_id.as_deref(), Some("client1_id"));
        assert_eq!(params.scopes(), vec!["g_profile", "openid"]);
        assert_eq!(params.extra.get("prompt").map(String::as_str), Some("login"));
        assert!(params.extra.contains_key("g_continue"));
        assert!(params.redirect_uri.is_none());
    }

    #[test]
    fn empty_values_are_absent() {
        let params = AuthorizationParameters::from_bag(bag(&[("scope", ""), ("nonce", "")])).unwrap();
        assert!(params.scope.is_none());
        assert!(params.nonce.is_none());
        assert!(params.scopes().is_empty());
    }

    #[test]
    fn authorization_details_parsed_from_json_text() {
        let params = AuthorizationParameters::from_bag(bag(&[(
            "authorization_details",
            r#"[{"type":"type1","actions":["action1-type1"]}]"#,
        )]))
        .unwrap();
        let details = params.authorization_details.unwrap();
        assert_eq!(details[0].detail_type, "type1");

        let err = AuthorizationParameters::from_bag(bag(&[("authorization_details", "{")])).unwrap_err();
        assert!(matches!(err, ParError::MalformedRequest(_)));
    }

    #[test]
    fn response_types() {
        let types = parse_response_types("token code").unwrap();
        assert_eq!(types.len(), 2);
        assert!(types.contains(&ResponseType::Code));

        assert!(matches!(
            parse_response_types("code id_token"),
            Err(ParError::PolicyViolation(_))
        ));
        assert!(parse_response_types("error").is_err());
        assert!(matches!(parse_response_types("  "), Err(ParError::MalformedRequest(_))));
    }
}
