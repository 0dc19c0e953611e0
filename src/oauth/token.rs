use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::decoder::IncomingRequest;
use super::issuer::CodeExchange;
use crate::error::{ParError, ParResult};
use crate::server::AppState;

/// Token endpoint.
///
/// `POST /{plugin}/token` (application/x-www-form-urlencoded)
///
/// Only `authorization_code` is served. Clients authenticate exactly as at
/// the PAR endpoint, with this endpoint's URL as assertion audience.
pub async fn token_exchange(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ParResult<Response> {
    let incoming = IncomingRequest::parse(&body, &headers)?;
    match incoming.field("grant_type") {
        Some("authorization_code") => {}
        Some(other) => {
            return Err(ParError::PolicyViolation(format!("unsupported grant_type {}", other)));
        }
        None => return Err(ParError::MalformedRequest("grant_type missing".into())),
    }
    let code = incoming
        .field("code")
        .ok_or_else(|| ParError::MalformedRequest("code missing".into()))?;

    let authenticated = state.authenticator().authenticate(
        &incoming.credentials,
        incoming.field("client_id"),
        None,
        &state.endpoints.url("token"),
    )?;

    let token = state.issuer.exchange_code(&CodeExchange {
        code,
        client_id: &authenticated.context.client_id,
        redirect_uri: incoming.field("redirect_uri"),
        code_verifier: incoming.field("code_verifier"),
    })?;

    log::info!(
        "Token issued: client={} grant=authorization_code method={}",
        authenticated.context.client_id,
        authenticated.context.auth_method.as_str()
    );

    Ok(([(header::CACHE_CONTROL, "no-store")], Json(token)).into_response())
}
