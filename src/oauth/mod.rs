//! OAuth 2.0 authorization request intake.
//!
//! Implements:
//! - RFC 9126 Pushed Authorization Requests
//! - RFC 9101 JWT-Secured Authorization Requests (signed, encrypted, nested)
//! - RFC 9396 Rich Authorization Requests
//! - RFC 7636 PKCE
//! - RFC 7523 client assertions (`client_secret_jwt`, `private_key_jwt`)
//!
//! Login, consent and token formats belong to the surrounding server; this
//! module only sees them through the collaborator traits in `crate::clients`
//! and [`issuer::AuthorizationIssuer`].

pub mod authorize;
pub mod client_auth;
pub mod decoder;
pub mod issuer;
pub mod jti;
pub mod par;
pub mod pkce;
pub mod rar;
pub mod token;
pub mod types;
pub mod validation;

pub use client_auth::{Authenticated, ClientAuthContext, ClientAuthenticator};
pub use decoder::{DecodedRequest, IncomingRequest, RequestDecoder, RequestObject};
pub use issuer::{AuthorizationIssuer, InMemoryIssuer};
pub use types::{AuthorizationParameters, ValidatedRequest};
