use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::pkce::{self, PkceChallenge};
use super::rar::AuthorizationDetail;
use super::types::ResponseType;
use crate::config::MAX_LIFETIME_SECS;
use crate::error::{ParError, ParResult};

/// Everything the user approved, ready to be turned into a code or token.
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub client_id: String,
    pub username: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub response_types: BTreeSet<ResponseType>,
    pub nonce: Option<String>,
    pub pkce: Option<PkceChallenge>,
    pub authorization_details: Option<Vec<AuthorizationDetail>>,
}

#[derive(Debug, Clone, Default)]
pub struct IssuedAuthorization {
    pub code: Option<String>,
    pub access_token: Option<String>,
    /// Access token lifetime, in seconds.
    pub expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct CodeExchange<'a> {
    pub code: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: Option<&'a str>,
    pub code_verifier: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_details: Option<Vec<AuthorizationDetail>>,
}

/// Code and token minting downstream of an approved authorization.
pub trait AuthorizationIssuer: Send + Sync {
    fn issue(&self, grant: AuthorizationGrant) -> ParResult<IssuedAuthorization>;
    fn exchange_code(&self, exchange: &CodeExchange<'_>) -> ParResult<IssuedToken>;
}

// ---------------------------------------------------------------------------
// InMemoryIssuer
// ---------------------------------------------------------------------------

struct AuthorizationCode {
    grant: AuthorizationGrant,
    expires_at: Instant,
    used: bool,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    pub username: String,
    pub scopes: Vec<String>,
    pub authorization_details: Option<Vec<AuthorizationDetail>>,
    pub expires_at: Instant,
}

pub struct InMemoryIssuer {
    code_ttl: Duration,
    token_ttl: Duration,
    codes: Mutex<HashMap<String, AuthorizationCode>>,
    access_tokens: Mutex<HashMap<String, AccessToken>>,
}

impl InMemoryIssuer {
    /// Lifetimes are capped at [`MAX_LIFETIME_SECS`].
    pub fn new(code_ttl: Duration, token_ttl: Duration) -> Self {
        let cap = Duration::from_secs(MAX_LIFETIME_SECS);
        Self {
            code_ttl: code_ttl.min(cap),
            token_ttl: token_ttl.min(cap),
            codes: Mutex::new(HashMap::new()),
            access_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a live access token.
    pub fn access_token(&self, token: &str) -> Option<AccessToken> {
        let tokens = self.access_tokens.lock().unwrap_or_else(|e| e.into_inner());
        tokens
            .get(token)
            .filter(|t| Instant::now() < t.expires_at)
            .cloned()
    }

    fn create_access_token(&self, grant: &AuthorizationGrant) -> AccessToken {
        let access = AccessToken {
            token: uuid::Uuid::new_v4().to_string(),
            client_id: grant.client_id.clone(),
            username: grant.username.clone(),
            scopes: grant.scopes.clone(),
            authorization_details: grant.authorization_details.clone(),
            expires_at: Instant::now() + self.token_ttl,
        };
        let mut tokens = self.access_tokens.lock().unwrap_or_else(|e| e.into_inner());
        // Lazy cleanup
        let now = Instant::now();
        tokens.retain(|_, t| now < t.expires_at);
        tokens.insert(access.token.clone(), access.clone());
        access
    }
}

impl AuthorizationIssuer for InMemoryIssuer {
    fn issue(&self, grant: AuthorizationGrant) -> ParResult<IssuedAuthorization> {
        let access_token = grant
            .response_types
            .contains(&ResponseType::Token)
            .then(|| self.create_access_token(&grant).token);

        let code = if grant.response_types.contains(&ResponseType::Code) {
            let code = uuid::Uuid::new_v4().to_string();
            let mut codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            codes.retain(|_, c| now < c.expires_at && !c.used);
            codes.insert(
                code.clone(),
                AuthorizationCode {
                    grant: grant.clone(),
                    expires_at: now + self.code_ttl,
                    used: false,
                },
            );
            Some(code)
        } else {
            None
        };

        log::info!(
            "Authorization issued: client={} user={} code={} token={}",
            grant.client_id,
            grant.username,
            code.is_some(),
            access_token.is_some()
        );

        Ok(IssuedAuthorization {
            code,
            access_token,
            expires_in: self.token_ttl.as_secs(),
        })
    }

    /// Exchange an authorization code. Checks single use, client, redirect
    /// URI and PKCE; the code is spent only when every check passes.
    fn exchange_code(&self, exchange: &CodeExchange<'_>) -> ParResult<IssuedToken> {
        let invalid = |reason: &str| ParError::PolicyViolation(format!("invalid_grant: {}", reason));

        let mut codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        let stored = codes.get_mut(exchange.code).ok_or_else(|| invalid("unknown code"))?;

        if stored.used {
            return Err(invalid("code already used"));
        }
        if Instant::now() >= stored.expires_at {
            return Err(invalid("code expired"));
        }
        if stored.grant.client_id != exchange.client_id {
            return Err(invalid("code issued to another client"));
        }
        if exchange.redirect_uri != Some(stored.grant.redirect_uri.as_str()) {
            return Err(invalid("redirect_uri mismatch"));
        }
        match (&stored.grant.pkce, exchange.code_verifier) {
            (Some(challenge), Some(verifier)) if pkce::verify(verifier, challenge) => {}
            (Some(_), _) => return Err(invalid("code_verifier does not match")),
            (None, Some(_)) => return Err(invalid("code_verifier without code_challenge")),
            (None, None) => {}
        }

        stored.used = true;
        let grant = stored.grant.clone();
        drop(codes);

        let access = self.create_access_token(&grant);
        Ok(IssuedToken {
            access_token: access.token,
            token_type: "Bearer".into(),
            expires_in: self.token_ttl.as_secs(),
            scope: grant.scopes.join(" "),
            authorization_details: grant.authorization_details,
        })
    }
}
