use std::str::FromStr;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};

use super::{JoseError, Jws, KeyIdentity};
use crate::clients::ClientRecord;
use crate::config::PluginConfig;

/// Key material a client registered for signature verification.
pub struct VerificationKeys<'a> {
    pub client_id: &'a str,
    pub secret: Option<&'a str>,
    pub jwks: Option<JwkSet>,
    pub pem: Option<&'a str>,
}

impl<'a> VerificationKeys<'a> {
    pub fn for_client(client: &'a ClientRecord, config: &PluginConfig) -> Self {
        Self {
            client_id: &client.client_id,
            secret: client.client_secret.as_deref(),
            jwks: client.jwks(&config.client_jwks_parameter),
            pem: client.property_str(&config.client_pubkey_parameter),
        }
    }
}

#[derive(Debug)]
pub struct Verified {
    pub claims: Map<String, Value>,
    pub key: KeyIdentity,
}

/// Verify a JWS against the signer's keys. HS* uses the client secret;
/// asymmetric algorithms use the JWKS (by `kid`) before the PEM key.
///
/// `exp` is enforced when present; no other claim is required here.
pub fn verify(jws: &Jws, keys: &VerificationKeys<'_>) -> Result<Verified, JoseError> {
    let algorithm = Algorithm::from_str(&jws.header.alg)
        .map_err(|_| JoseError::UnsupportedAlgorithm(jws.header.alg.clone()))?;
    let (decoding_key, identity) = resolve_key(algorithm, jws.header.kid.as_deref(), keys)?;

    let mut validation = Validation::new(algorithm);
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation.leeway = 0;

    let data = jsonwebtoken::decode::<Map<String, Value>>(jws.raw(), &decoding_key, &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JoseError::Expired,
            _ => JoseError::Signature(e.to_string()),
        })?;

    Ok(Verified {
        claims: data.claims,
        key: identity,
    })
}

fn resolve_key(
    algorithm: Algorithm,
    kid: Option<&str>,
    keys: &VerificationKeys<'_>,
) -> Result<(DecodingKey, KeyIdentity), JoseError> {
    let client_id = keys.client_id.to_string();

    if matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
        let secret = keys
            .secret
            .filter(|s| !s.is_empty())
            .ok_or_else(|| JoseError::KeyUnavailable(format!("{} has no client secret", client_id)))?;
        return Ok((
            DecodingKey::from_secret(secret.as_bytes()),
            KeyIdentity::ClientSecret { client_id },
        ));
    }

    if let Some(jwks) = &keys.jwks {
        let jwk = match kid {
            Some(kid) => jwks.find(kid),
            None if jwks.keys.len() == 1 => jwks.keys.first(),
            None => None,
        };
        if let Some(jwk) = jwk {
            let key = DecodingKey::from_jwk(jwk).map_err(|e| JoseError::KeyUnavailable(e.to_string()))?;
            return Ok((
                key,
                KeyIdentity::ClientJwk {
                    client_id,
                    kid: kid.map(String::from),
                },
            ));
        }
    }

    let pem = keys
        .pem
        .ok_or_else(|| JoseError::KeyUnavailable(format!("{} has no public key", client_id)))?;
    let key = match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem.as_bytes()),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem.as_bytes()),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem.as_bytes()),
        other => return Err(JoseError::UnsupportedAlgorithm(format!("{:?}", other))),
    }
    .map_err(|e| JoseError::KeyUnavailable(e.to_string()))?;

    Ok((key, KeyIdentity::ClientPem { client_id }))
}
