use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::store::StoreError;

/// Every way a pushed or direct authorization request can fail.
///
/// The request-facing kinds all collapse to the same 403 body at the HTTP
/// boundary. The detail string is only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum ParError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Client authentication failed: {0}")]
    ClientAuthFailure(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Unknown, expired or consumed request_uri")]
    NotFoundOrExpired,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Serialize for ParError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<StoreError> for ParError {
    fn from(err: StoreError) -> Self {
        ParError::Storage(err.to_string())
    }
}

impl From<ParError> for StatusCode {
    fn from(err: ParError) -> Self {
        match err {
            ParError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for ParError {
    fn into_response(self) -> Response {
        let body = match &self {
            ParError::Storage(_) => {
                log::error!("PAR storage failure: {}", self);
                "server_error"
            }
            _ => {
                log::warn!("PAR rejected: {}", self);
                "access_denied"
            }
        };
        let status: StatusCode = self.into();
        (status, Json(serde_json::json!({ "error": body }))).into_response()
    }
}

pub type ParResult<T> = Result<T, ParError>;
