//! Turns a raw form body or query string into a flat parameter bag,
//! opening a JAR request object on the way when one is present.

use std::collections::BTreeMap;

use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rsa::RsaPrivateKey;
use serde_json::{Map, Value};

use super::types::AuthorizationParameters;
use crate::clients::{ClientRecord, ClientRegistry};
use crate::config::PluginConfig;
use crate::error::{ParError, ParResult};
use crate::jose::jwe::{self, DecryptionKey};
use crate::jose::jws::{self, VerificationKeys, Verified};
use crate::jose::{self, CompactToken, Envelope, JoseError, Jwe, Jws, KeyIdentity};

/// JWT bookkeeping claims that are not authorization parameters.
const NON_PARAMETER_CLAIMS: &[&str] = &["iss", "aud", "exp", "iat", "nbf", "jti", "sub"];

// ---------------------------------------------------------------------------
// Incoming request
// ---------------------------------------------------------------------------

/// Client credentials exactly as presented, not yet checked.
#[derive(Debug, Clone, Default)]
pub struct PresentedCredentials {
    pub basic: Option<(String, String)>,
    pub client_secret: Option<String>,
    pub client_assertion: Option<String>,
    pub client_assertion_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    pub fields: BTreeMap<String, String>,
    pub credentials: PresentedCredentials,
}

impl IncomingRequest {
    /// Parse an `application/x-www-form-urlencoded` body or query string.
    /// Repeated parameters are refused.
    pub fn parse(raw: &[u8], headers: &HeaderMap) -> ParResult<Self> {
        let mut fields = BTreeMap::new();
        for (name, value) in url::form_urlencoded::parse(raw) {
            if fields.insert(name.to_string(), value.into_owned()).is_some() {
                return Err(ParError::MalformedRequest(format!("repeated parameter {}", name)));
            }
        }

        let credentials = PresentedCredentials {
            basic: basic_credentials(headers)?,
            client_secret: fields.remove("client_secret"),
            client_assertion: fields.remove("client_assertion"),
            client_assertion_type: fields.remove("client_assertion_type"),
        };
        Ok(Self { fields, credentials })
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// `Authorization: Basic` credentials. Both halves are form-urlencoded
/// (RFC 6749 §2.3.1). Other schemes are ignored.
fn basic_credentials(headers: &HeaderMap) -> ParResult<Option<(String, String)>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ParError::ClientAuthFailure("non-ASCII Authorization header".into()))?;
    let Some((scheme, encoded)) = value.split_once(' ') else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Ok(None);
    }

    let bad = || ParError::ClientAuthFailure("malformed Basic credentials".into());
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| bad())?;
    let decoded = String::from_utf8(decoded).map_err(|_| bad())?;
    let (id, secret) = decoded.split_once(':').ok_or_else(bad)?;
    let id = urlencoding::decode(id).map_err(|_| bad())?;
    let secret = urlencoding::decode(secret).map_err(|_| bad())?;
    if id.is_empty() {
        return Err(bad());
    }
    Ok(Some((id.into_owned(), secret.into_owned())))
}

// ---------------------------------------------------------------------------
// Request object
// ---------------------------------------------------------------------------

/// A decoded JAR request object.
#[derive(Debug, Clone)]
pub struct RequestObject {
    pub envelope: Envelope,
    pub claims: Map<String, Value>,
    /// Set when a signature was verified.
    pub signing_key: Option<KeyIdentity>,
    /// Set when the object was encrypted.
    pub decryption_key: Option<KeyIdentity>,
}

#[derive(Debug, Clone)]
pub struct DecodedRequest {
    pub parameters: AuthorizationParameters,
    pub request_object: Option<RequestObject>,
}

pub struct RequestDecoder<'a> {
    pub config: &'a PluginConfig,
    pub clients: &'a dyn ClientRegistry,
    pub server_key: Option<&'a RsaPrivateKey>,
}

impl RequestDecoder<'_> {
    /// With a `request` object, authorization parameters come from its claims
    /// alone. Of the outer fields only `client_id` is kept, and it must agree
    /// with the object.
    pub fn decode(&self, incoming: &IncomingRequest) -> ParResult<DecodedRequest> {
        let Some(raw) = incoming.field("request") else {
            return Ok(DecodedRequest {
                parameters: AuthorizationParameters::from_bag(incoming.fields.clone())?,
                request_object: None,
            });
        };
        if !self.config.request_parameter_allow {
            return Err(ParError::PolicyViolation("request objects are disabled".into()));
        }

        let hint = incoming
            .field("client_id")
            .map(String::from)
            .or_else(|| incoming.credentials.basic.as_ref().map(|(id, _)| id.clone()));
        let object = self.open(raw, hint.as_deref())?;

        let claimed = claimed_client_id(&object.claims)?;
        if let (Some(hint), Some(claimed)) = (&hint, &claimed) {
            if hint != claimed {
                return Err(ParError::MalformedRequest(format!(
                    "client_id {} does not match request object client {}",
                    hint, claimed
                )));
            }
        }

        let ignored = incoming
            .fields
            .keys()
            .filter(|name| !matches!(name.as_str(), "request" | "client_id"))
            .count();
        if ignored > 0 {
            log::debug!("Request object present, ignoring {} outer parameters", ignored);
        }

        let mut bag = BTreeMap::new();
        for (name, value) in &object.claims {
            if NON_PARAMETER_CLAIMS.contains(&name.as_str()) {
                continue;
            }
            if name == "request" || name == "request_uri" {
                return Err(ParError::MalformedRequest(format!(
                    "{} inside a request object",
                    name
                )));
            }
            match value {
                Value::Null => {}
                Value::String(s) => {
                    bag.insert(name.clone(), s.clone());
                }
                other => {
                    bag.insert(name.clone(), other.to_string());
                }
            }
        }
        let outer_client_id = incoming.field("client_id").map(String::from);
        if let Some(client_id) = claimed.or(outer_client_id) {
            bag.entry("client_id".to_string()).or_insert(client_id);
        }

        log::debug!(
            "Request object opened: envelope={:?} claims={}",
            object.envelope,
            object.claims.len()
        );

        Ok(DecodedRequest {
            parameters: AuthorizationParameters::from_bag(bag)?,
            request_object: Some(object),
        })
    }

    fn open(&self, raw: &str, hint: Option<&str>) -> ParResult<RequestObject> {
        match CompactToken::parse(raw).map_err(malformed)? {
            CompactToken::Signed(jws) => {
                let verified = self.verify_signed(&jws, hint)?;
                Ok(RequestObject {
                    envelope: Envelope::Signed,
                    claims: verified.claims,
                    signing_key: Some(verified.key),
                    decryption_key: None,
                })
            }
            CompactToken::Encrypted(jwe) => {
                if !self.config.request_parameter_allow_encrypted {
                    return Err(ParError::PolicyViolation(
                        "encrypted request objects are disabled".into(),
                    ));
                }
                let (payload, decryption_key) = self.decrypt(&jwe, hint)?;
                let payload = String::from_utf8(payload)
                    .map_err(|_| ParError::MalformedRequest("request object payload is not UTF-8".into()))?;
                let payload = payload.trim();

                if payload.starts_with('{') {
                    let claims: Map<String, Value> = serde_json::from_str(payload)
                        .map_err(|e| ParError::MalformedRequest(format!("request object claims: {}", e)))?;
                    jose::check_expiry(&claims, Utc::now().timestamp()).map_err(malformed)?;
                    return Ok(RequestObject {
                        envelope: Envelope::Encrypted,
                        claims,
                        signing_key: None,
                        decryption_key: Some(decryption_key),
                    });
                }

                match CompactToken::parse(payload).map_err(malformed)? {
                    CompactToken::Signed(inner) => {
                        let verified = self.verify_signed(&inner, hint)?;
                        Ok(RequestObject {
                            envelope: Envelope::Nested,
                            claims: verified.claims,
                            signing_key: Some(verified.key),
                            decryption_key: Some(decryption_key),
                        })
                    }
                    CompactToken::Encrypted(_) => Err(ParError::MalformedRequest(
                        "request object encrypted twice".into(),
                    )),
                }
            }
        }
    }

    fn verify_signed(&self, jws: &Jws, hint: Option<&str>) -> ParResult<Verified> {
        let unverified = jws.unverified_claims().map_err(malformed)?;
        let signer = claimed_client_id(&unverified)?
            .or_else(|| hint.map(String::from))
            .ok_or_else(|| ParError::MalformedRequest("request object names no client".into()))?;
        let client = self.enabled_client(&signer)?;

        jws::verify(jws, &VerificationKeys::for_client(&client, self.config)).map_err(malformed)
    }

    fn decrypt(&self, jwe: &Jwe, hint: Option<&str>) -> ParResult<(Vec<u8>, KeyIdentity)> {
        if jwe.uses_shared_secret() {
            let client_id = hint.ok_or_else(|| {
                ParError::MalformedRequest("dir encryption needs client_id outside the request object".into())
            })?;
            let client = self.enabled_client(client_id)?;
            let secret = client
                .client_secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ParError::MalformedRequest(format!("client {} has no secret", client_id)))?;
            let key = DecryptionKey::ClientSecret { client_id, secret };
            let payload = jwe::decrypt(jwe, &key).map_err(malformed)?;
            return Ok((payload, key.identity()));
        }

        let server_key = self
            .server_key
            .ok_or_else(|| ParError::PolicyViolation("no server key configured for decryption".into()))?;
        let key = DecryptionKey::Server(server_key);
        let payload = jwe::decrypt(jwe, &key).map_err(malformed)?;
        Ok((payload, key.identity()))
    }

    fn enabled_client(&self, client_id: &str) -> ParResult<ClientRecord> {
        match self.clients.get(client_id) {
            Some(client) if client.enabled => Ok(client),
            Some(_) => Err(ParError::ClientAuthFailure(format!("client {} is disabled", client_id))),
            None => Err(ParError::ClientAuthFailure(format!("unknown client {}", client_id))),
        }
    }
}

/// `client_id` claim, falling back to `iss`. When both are present they must agree.
fn claimed_client_id(claims: &Map<String, Value>) -> ParResult<Option<String>> {
    let client_id = claims.get("client_id").and_then(Value::as_str);
    let iss = claims.get("iss").and_then(Value::as_str);
    match (client_id, iss) {
        (Some(c), Some(i)) if c != i => Err(ParError::MalformedRequest(
            "request object iss differs from client_id".into(),
        )),
        (Some(c), _) => Ok(Some(c.to_string())),
        (None, Some(i)) => Ok(Some(i.to_string())),
        (None, None) => Ok(None),
    }
}

fn malformed(err: JoseError) -> ParError {
    ParError::MalformedRequest(format!("request object: {}", err))
}
