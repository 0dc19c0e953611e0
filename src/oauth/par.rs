use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::decoder::IncomingRequest;
use super::types::ValidatedRequest;
use super::validation::validate_request;
use crate::error::{ParError, ParResult};
use crate::server::AppState;
use crate::store::{mint_token, PushedAuthorizationRequest, PushedRequestStore, StoreError};

/// Attempts at minting an unused token before giving up.
const MINT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParResponse {
    pub request_uri: String,
    pub expires_in: u64,
}

/// Pushed Authorization Request endpoint (RFC 9126).
///
/// `POST /{plugin}/par` (application/x-www-form-urlencoded)
///
/// The body is read as raw bytes so that a missing or empty form still
/// reaches the uniform 403 path instead of an extractor rejection.
pub async fn push(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ParResponse>), ParError> {
    if !state.config.oauth_par_allowed {
        return Err(ParError::PolicyViolation("pushed authorization requests are disabled".into()));
    }

    let incoming = IncomingRequest::parse(&body, &headers)?;
    if incoming.field("request_uri").is_some() {
        return Err(ParError::MalformedRequest("request_uri is not allowed at the PAR endpoint".into()));
    }

    let decoded = state.decoder().decode(&incoming)?;
    let authenticated = state.authenticator().authenticate(
        &incoming.credentials,
        decoded.parameters.client_id.as_deref(),
        decoded.request_object.as_ref(),
        &state.endpoints.url("par"),
    )?;

    let mut parameters = decoded.parameters;
    if parameters.client_id.is_none() {
        parameters.client_id = Some(authenticated.context.client_id.clone());
    }
    let validated = validate_request(
        parameters,
        &authenticated.client,
        decoded.request_object.as_ref(),
        &state.config,
    )?;

    let client_id = validated.client_id.clone();
    let lifetime = state.config.oauth_par_duration;
    let token = store_pushed(state.store.as_ref(), validated, lifetime)?;

    log::info!(
        "PAR issued: client={} method={} expires_in={}",
        client_id,
        authenticated.context.auth_method.as_str(),
        lifetime
    );

    Ok((
        StatusCode::CREATED,
        Json(ParResponse {
            request_uri: format!("{}{}", state.config.request_uri_prefix, token),
            expires_in: lifetime,
        }),
    ))
}

/// Persist under a fresh token, re-minting on collision.
fn store_pushed(
    store: &dyn PushedRequestStore,
    validated: ValidatedRequest,
    lifetime: u64,
) -> ParResult<String> {
    for _ in 0..MINT_ATTEMPTS {
        let record = PushedAuthorizationRequest::new(mint_token(), validated.clone(), lifetime);
        let token = record.token.clone();
        match store.create(record) {
            Ok(()) => return Ok(token),
            Err(StoreError::Conflict) => {
                log::warn!("PAR token collision, minting again");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ParError::Storage("no unique request_uri after retries".into()))
}
