use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use super::decoder::IncomingRequest;
use super::issuer::{AuthorizationGrant, IssuedAuthorization};
use super::rar;
use super::types::ValidatedRequest;
use super::validation::{scopes_granted, validate_request};
use crate::clients::{session_cookie, ClientRecord, UserSession};
use crate::error::{ParError, ParResult};
use crate::server::AppState;

// ---------------------------------------------------------------------------
// GET /{plugin}/auth
// ---------------------------------------------------------------------------

/// Authorization endpoint.
///
/// Accepts either a `request_uri` from a previous push or a full set of
/// parameters (unless PAR is required). Without a logged-in user holding
/// the needed grant, the user agent goes to the login page and nothing is
/// consumed.
pub async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ParError> {
    let query = uri.query().unwrap_or_default();
    let incoming = IncomingRequest::parse(query.as_bytes(), &HeaderMap::new())?;
    let session = session_cookie(&headers, &state.endpoints.session_cookie)
        .and_then(|id| state.sessions.resolve(&id));

    match incoming.field("request_uri") {
        Some(request_uri) => from_pushed(&state, &incoming, request_uri, session, &uri),
        None => direct(&state, &incoming, session, &uri),
    }
}

fn from_pushed(
    state: &AppState,
    incoming: &IncomingRequest,
    request_uri: &str,
    session: Option<UserSession>,
    uri: &Uri,
) -> ParResult<Response> {
    if !state.config.oauth_par_allowed {
        return Err(ParError::PolicyViolation("pushed authorization requests are disabled".into()));
    }
    if incoming.field("request").is_some() {
        return Err(ParError::MalformedRequest("request and request_uri together".into()));
    }
    let token = request_uri
        .strip_prefix(state.config.request_uri_prefix.as_str())
        .ok_or(ParError::NotFoundOrExpired)?;

    let pushed = state.store.get(token)?.ok_or(ParError::NotFoundOrExpired)?;
    if let Some(client_id) = incoming.field("client_id") {
        if client_id != pushed.client_id {
            return Err(ParError::ClientAuthFailure(format!(
                "request_uri belongs to {}, not {}",
                pushed.client_id, client_id
            )));
        }
    }
    enabled_client(state, &pushed.client_id)?;

    let Some(session) = session.filter(|s| has_grant(state, s, &pushed.parameters)) else {
        return Ok(login_redirect(state, uri, &pushed.parameters));
    };

    // The loser of a concurrent consume lands here with nothing.
    let consumed = state.store.consume(token)?.ok_or(ParError::NotFoundOrExpired)?;
    log::info!(
        "PAR consumed: client={} user={}",
        consumed.client_id,
        session.username
    );
    finish(state, consumed.parameters, &session)
}

fn direct(
    state: &AppState,
    incoming: &IncomingRequest,
    session: Option<UserSession>,
    uri: &Uri,
) -> ParResult<Response> {
    if state.config.oauth_par_required {
        return Err(ParError::PolicyViolation("request_uri required".into()));
    }

    let decoded = state.decoder().decode(incoming)?;
    let client_id = decoded
        .parameters
        .client_id
        .clone()
        .ok_or_else(|| ParError::MalformedRequest("client_id missing".into()))?;
    let client = enabled_client(state, &client_id)?;
    let validated = validate_request(
        decoded.parameters,
        &client,
        decoded.request_object.as_ref(),
        &state.config,
    )?;

    match session.filter(|s| has_grant(state, s, &validated)) {
        Some(session) => finish(state, validated, &session),
        None => Ok(login_redirect(state, uri, &validated)),
    }
}

fn enabled_client(state: &AppState, client_id: &str) -> ParResult<ClientRecord> {
    state
        .clients
        .get(client_id)
        .filter(|c| c.enabled)
        .ok_or_else(|| ParError::ClientAuthFailure(format!("unknown or disabled client {}", client_id)))
}

fn has_grant(state: &AppState, session: &UserSession, request: &ValidatedRequest) -> bool {
    let granted = state.grants.granted_scopes(&session.username, &request.client_id);
    scopes_granted(&request.scopes, &granted)
}

/// Hand the approved request to the issuer and send the user agent back to the client.
fn finish(state: &AppState, request: ValidatedRequest, session: &UserSession) -> ParResult<Response> {
    let authorization_details = request
        .parameters
        .authorization_details
        .clone()
        .map(|details| rar::enrich(details, &state.config, &session.claims));

    let issued = state.issuer.issue(AuthorizationGrant {
        client_id: request.client_id.clone(),
        username: session.username.clone(),
        redirect_uri: request.redirect_uri.clone(),
        scopes: request.scopes.clone(),
        response_types: request.response_types.clone(),
        nonce: request.parameters.nonce.clone(),
        pkce: request.pkce.clone(),
        authorization_details,
    })?;

    Ok(found(client_redirect(&request, &issued)))
}

// ---------------------------------------------------------------------------
// Redirect helpers
// ---------------------------------------------------------------------------

/// Response parameters go in the fragment when a token is returned, in the
/// query otherwise.
fn client_redirect(request: &ValidatedRequest, issued: &IssuedAuthorization) -> String {
    let mut params = url::form_urlencoded::Serializer::new(String::new());
    if let Some(code) = &issued.code {
        params.append_pair("code", code);
    }
    if let Some(token) = &issued.access_token {
        params.append_pair("access_token", token);
        params.append_pair("token_type", "bearer");
        params.append_pair("expires_in", &issued.expires_in.to_string());
    }
    if let Some(state) = &request.parameters.state {
        params.append_pair("state", state);
    }
    let params = params.finish();

    if request.wants_token() {
        format!("{}#{}", request.redirect_uri, params)
    } else {
        append_query(&request.redirect_uri, &params)
    }
}

/// Send the user to log in, with a callback that replays this exact call.
fn login_redirect(state: &AppState, uri: &Uri, request: &ValidatedRequest) -> Response {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or_else(|| uri.path());
    let callback = format!("{}{}", state.endpoints.external_url, path_and_query);

    let params = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("callback_url", &callback)
        .append_pair("scope", &request.scopes.join(" "))
        .append_pair("client_id", &request.client_id)
        .finish();

    log::debug!("Login required: client={} callback={}", request.client_id, callback);
    found(append_query(&state.endpoints.login_url, &params))
}

fn append_query(base: &str, params: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, separator, params)
}

fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}
