//! Client authentication at the PAR and token endpoints.
//!
//! A caller presents at most one credential kind: HTTP Basic, a body
//! `client_secret`, or a `client_assertion` JWT. With none of those, a
//! request object signed with the client's keys stands in for a JWT
//! credential, and failing that the caller is a public client.

use chrono::Utc;
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;

use super::decoder::{PresentedCredentials, RequestObject};
use super::jti::JtiCache;
use super::types::CLIENT_ASSERTION_TYPE_JWT_BEARER;
use crate::clients::{AuthMethod, ClientRecord, ClientRegistry};
use crate::config::PluginConfig;
use crate::error::{ParError, ParResult};
use crate::jose::jws::{self, VerificationKeys};
use crate::jose::{CompactToken, KeyIdentity};

/// Who the caller proved to be, and how.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientAuthContext {
    pub client_id: String,
    pub is_confidential: bool,
    pub auth_method: AuthMethod,
    pub verification_key: Option<KeyIdentity>,
}

#[derive(Debug, Clone)]
pub struct Authenticated {
    pub context: ClientAuthContext,
    pub client: ClientRecord,
}

pub struct ClientAuthenticator<'a> {
    pub config: &'a PluginConfig,
    pub clients: &'a dyn ClientRegistry,
    pub jti_cache: &'a JtiCache,
}

fn failure(reason: impl Into<String>) -> ParError {
    ParError::ClientAuthFailure(reason.into())
}

impl ClientAuthenticator<'_> {
    /// `claimed_client_id` is the `client_id` from the body or request object;
    /// `audience` is the absolute URL of the endpoint being called.
    pub fn authenticate(
        &self,
        credentials: &PresentedCredentials,
        claimed_client_id: Option<&str>,
        request_object: Option<&RequestObject>,
        audience: &str,
    ) -> ParResult<Authenticated> {
        let uses_assertion =
            credentials.client_assertion.is_some() || credentials.client_assertion_type.is_some();
        let presented = [
            credentials.basic.is_some(),
            credentials.client_secret.is_some(),
            uses_assertion,
        ]
        .iter()
        .filter(|p| **p)
        .count();
        if presented > 1 {
            return Err(failure("more than one client authentication method"));
        }

        let (client, method, key) = if let Some((id, secret)) = &credentials.basic {
            let client = self.client(id)?;
            check_secret(&client, secret)?;
            let key = KeyIdentity::ClientSecret { client_id: client.client_id.clone() };
            (client, AuthMethod::ClientSecretBasic, Some(key))
        } else if let Some(secret) = &credentials.client_secret {
            let id = claimed_client_id.ok_or_else(|| failure("client_secret without client_id"))?;
            let client = self.client(id)?;
            check_secret(&client, secret)?;
            let key = KeyIdentity::ClientSecret { client_id: client.client_id.clone() };
            (client, AuthMethod::ClientSecretPost, Some(key))
        } else if uses_assertion {
            self.verify_assertion(credentials, audience)?
        } else {
            let id = claimed_client_id.ok_or_else(|| failure("no client_id"))?;
            let client = self.client(id)?;
            self.implicit_method(client, request_object)?
        };

        if let Some(claimed) = claimed_client_id {
            if claimed != client.client_id {
                return Err(failure(format!(
                    "client_id {} does not match credentials of {}",
                    claimed, client.client_id
                )));
            }
        }
        if !client.allows(method) {
            return Err(failure(format!(
                "{} is not allowed for client {}",
                method.as_str(),
                client.client_id
            )));
        }

        log::debug!(
            "Client authenticated: client={} method={}",
            client.client_id,
            method.as_str()
        );

        Ok(Authenticated {
            context: ClientAuthContext {
                client_id: client.client_id.clone(),
                is_confidential: client.confidential,
                auth_method: method,
                verification_key: key,
            },
            client,
        })
    }

    fn client(&self, client_id: &str) -> ParResult<ClientRecord> {
        match self.clients.get(client_id) {
            Some(client) if client.enabled => Ok(client),
            Some(_) => Err(failure(format!("client {} is disabled", client_id))),
            None => Err(failure(format!("unknown client {}", client_id))),
        }
    }

    /// No explicit credential: a request object signed with this client's
    /// keys counts as a JWT credential, otherwise the client is public.
    fn implicit_method(
        &self,
        client: ClientRecord,
        request_object: Option<&RequestObject>,
    ) -> ParResult<(ClientRecord, AuthMethod, Option<KeyIdentity>)> {
        let signing_key = request_object
            .and_then(|o| o.signing_key.as_ref())
            .filter(|k| k.client_id() == Some(client.client_id.as_str()));

        if let Some(key) = signing_key {
            let method = if key.is_symmetric() {
                AuthMethod::ClientSecretJwt
            } else {
                AuthMethod::PrivateKeyJwt
            };
            if client.allows(method) {
                return Ok((client, method, Some(key.clone())));
            }
        }
        if client.allows(AuthMethod::None) {
            return Ok((client, AuthMethod::None, None));
        }
        Err(failure(format!("client {} presented no credentials", client.client_id)))
    }

    fn verify_assertion(
        &self,
        credentials: &PresentedCredentials,
        audience: &str,
    ) -> ParResult<(ClientRecord, AuthMethod, Option<KeyIdentity>)> {
        if credentials.client_assertion_type.as_deref() != Some(CLIENT_ASSERTION_TYPE_JWT_BEARER) {
            return Err(failure("unsupported client_assertion_type"));
        }
        let raw = credentials
            .client_assertion
            .as_deref()
            .ok_or_else(|| failure("client_assertion missing"))?;
        let jws = match CompactToken::parse(raw) {
            Ok(CompactToken::Signed(jws)) => jws,
            Ok(CompactToken::Encrypted(_)) => return Err(failure("encrypted client assertion")),
            Err(e) => return Err(failure(format!("client_assertion: {}", e))),
        };

        let unverified = jws
            .unverified_claims()
            .map_err(|e| failure(format!("client_assertion: {}", e)))?;
        let client_id = unverified
            .get("sub")
            .or_else(|| unverified.get("iss"))
            .and_then(Value::as_str)
            .ok_or_else(|| failure("client_assertion names no client"))?;
        let client = self.client(client_id)?;

        let verified = jws::verify(&jws, &VerificationKeys::for_client(&client, self.config))
            .map_err(|e| failure(format!("client_assertion: {}", e)))?;

        let now = Utc::now().timestamp();
        let (jti, exp) = check_assertion_claims(
            &verified.claims,
            &client.client_id,
            audience,
            self.config.client_auth_token_max_age,
            now,
        )?;
        if !self.jti_cache.record(&client.client_id, &jti, exp, now) {
            return Err(failure(format!("client_assertion jti {} replayed", jti)));
        }

        let method = if verified.key.is_symmetric() {
            AuthMethod::ClientSecretJwt
        } else {
            AuthMethod::PrivateKeyJwt
        };
        Ok((client, method, Some(verified.key)))
    }
}

fn check_secret(client: &ClientRecord, presented: &str) -> ParResult<()> {
    let expected = client
        .client_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| failure(format!("client {} has no secret", client.client_id)))?;
    if bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
        Ok(())
    } else {
        Err(failure(format!("wrong secret for client {}", client.client_id)))
    }
}

/// RFC 7523 §3 claim checks. Returns `(jti, exp)` for replay tracking.
fn check_assertion_claims(
    claims: &Map<String, Value>,
    client_id: &str,
    audience: &str,
    max_age: i64,
    now: i64,
) -> ParResult<(String, i64)> {
    let str_claim = |name: &str| claims.get(name).and_then(Value::as_str);

    if str_claim("iss") != Some(client_id) || str_claim("sub") != Some(client_id) {
        return Err(failure("client_assertion iss/sub must equal client_id"));
    }

    let audience_ok = match claims.get("aud") {
        Some(Value::String(aud)) => aud == audience,
        Some(Value::Array(auds)) => auds.iter().any(|a| a.as_str() == Some(audience)),
        _ => false,
    };
    if !audience_ok {
        return Err(failure(format!("client_assertion audience is not {}", audience)));
    }

    let jti = str_claim("jti")
        .filter(|j| !j.is_empty())
        .ok_or_else(|| failure("client_assertion jti missing"))?;
    let exp = claims
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or_else(|| failure("client_assertion exp missing"))?;
    let iat = claims
        .get("iat")
        .and_then(Value::as_i64)
        .ok_or_else(|| failure("client_assertion iat missing"))?;

    if exp <= now {
        return Err(failure("client_assertion expired"));
    }
    if iat > now {
        return Err(failure("client_assertion issued in the future"));
    }
    match exp.checked_sub(iat) {
        Some(lifetime) if lifetime <= max_age => {}
        _ => return Err(failure("client_assertion lifetime exceeds the allowed maximum")),
    }

    Ok((jti.to_string(), exp))
}
