#![allow(dead_code)]

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand_core::{OsRng, RngCore};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;

use oidc_par::{AppState, ServerConfig};

pub const EXTERNAL_URL: &str = "https://glewlwyd.tld/api";
pub const LOGIN_URL: &str = "https://glewlwyd.tld/login.html";
pub const PAR: &str = "/oidc_par/par";
pub const AUTH: &str = "/oidc_par/auth";
pub const TOKEN: &str = "/oidc_par/token";
pub const PREFIX: &str = "urn:ietf:params:oauth:request_uri:";

pub const REDIRECT: &str = "../../test-oidc.html?param=client1_cb1";
pub const SESSION: &str = "s3ss10n";
pub const PUBLIC_CLIENT: &str = "client1_id";
pub const CONFIDENTIAL_CLIENT: &str = "client_par";
pub const SECRET: &str = "secret_string";

/// RFC 7636 Appendix B
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
pub const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

pub const CLIENT_RSA: &str = include_str!("../fixtures/client_rsa.pem");
pub const CLIENT_RSA_PUB: &str = include_str!("../fixtures/client_rsa.pub.pem");
pub const SERVER_RSA: &str = include_str!("../fixtures/server_rsa.pem");

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Service under test
// ---------------------------------------------------------------------------

pub fn config() -> ServerConfig {
    let value = json!({
        "external-url": EXTERNAL_URL,
        "login-url": LOGIN_URL,
        "plugin": {
            "key": SERVER_RSA,
            "oauth-rar-allowed": true,
            "rar-allow-auth-unsigned": true,
            "rar-allow-auth-unencrypted": true,
            "rar-types": {
                "type1": {
                    "scopes": ["g_profile", "openid"],
                    "locations": ["https://type1-1.resource.tld", "https://type1-2.resource.tld"],
                    "actions": ["action1-type1", "action2-type1"],
                    "datatypes": ["type1-type1", "type2-type1"],
                    "enriched": ["name", "email"]
                }
            }
        },
        "clients": [
            {
                "client_id": PUBLIC_CLIENT,
                "name": "Public client",
                "redirect_uri": [REDIRECT],
                "authorization_type": ["code", "token"]
            },
            {
                "client_id": CONFIDENTIAL_CLIENT,
                "name": "PAR client",
                "client_secret": SECRET,
                "confidential": true,
                "redirect_uri": [REDIRECT],
                "authorization_type": ["code", "token"],
                "token_endpoint_auth_method": [
                    "client_secret_basic",
                    "client_secret_post",
                    "client_secret_jwt",
                    "private_key_jwt"
                ],
                "pubkey": CLIENT_RSA_PUB,
                "authorization_data_types": ["type1"]
            }
        ],
        "users": [
            {
                "username": "user1",
                "session": SESSION,
                "claims": {"name": "Dave Lopper", "email": "dev@glewlwyd.tld"},
                "grants": {
                    PUBLIC_CLIENT: ["g_profile", "openid"],
                    CONFIDENTIAL_CLIENT: ["g_profile", "openid"]
                }
            }
        ]
    });
    serde_json::from_value(value).unwrap()
}

pub fn app() -> Router {
    app_with(|_| {})
}

pub fn app_with(adjust: impl FnOnce(&mut ServerConfig)) -> Router {
    let mut config = config();
    adjust(&mut config);
    let config = config.finalize().unwrap();
    oidc_par::router(AppState::from_config(&config).unwrap())
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub fn form(pairs: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}

pub fn basic(id: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", id, secret)))
}

pub async fn post(app: &Router, path: &str, body: String, authorization: Option<String>) -> (StatusCode, Value) {
    let mut request = Request::post(path).header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(authorization) = authorization {
        request = request.header(header::AUTHORIZATION, authorization);
    }
    let response = app.clone().oneshot(request.body(Body::from(body)).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub async fn push(app: &Router, pairs: &[(&str, &str)], authorization: Option<String>) -> (StatusCode, Value) {
    post(app, PAR, form(pairs), authorization).await
}

/// Push and return the `request_uri`, asserting success.
pub async fn push_ok(app: &Router, pairs: &[(&str, &str)], authorization: Option<String>) -> String {
    let (status, body) = push(app, pairs, authorization).await;
    assert_eq!(status, StatusCode::CREATED, "push failed: {}", body);
    body["request_uri"].as_str().unwrap().to_string()
}

/// `GET` the authorization endpoint. Returns the status and `Location`.
pub async fn authorize(app: &Router, pairs: &[(&str, &str)], session: Option<&str>) -> (StatusCode, Option<String>) {
    let mut request = Request::get(format!("{}?{}", AUTH, form(pairs)));
    if let Some(session) = session {
        request = request.header(header::COOKIE, format!("GLEWLWYD_SESSION_ID={}", session));
    }
    let response = app.clone().oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|v| v.to_str().unwrap().to_string());
    (response.status(), location)
}

/// Response parameters from a redirect: the fragment when there is one,
/// otherwise the query.
pub fn redirect_params(location: &str) -> HashMap<String, String> {
    let encoded = match location.split_once('#') {
        Some((_, fragment)) => fragment,
        None => location.split_once('?').map(|(_, q)| q).unwrap_or_default(),
    };
    url::form_urlencoded::parse(encoded.as_bytes()).into_owned().collect()
}

// ---------------------------------------------------------------------------
// JOSE builders
// ---------------------------------------------------------------------------

pub fn now() -> i64 {
    Utc::now().timestamp()
}

pub fn rs256(claims: &Value) -> String {
    encode(
        &Header::new(Algorithm::RS256),
        claims,
        &EncodingKey::from_rsa_pem(CLIENT_RSA.as_bytes()).unwrap(),
    )
    .unwrap()
}

pub fn hs256(claims: &Value, secret: &str) -> String {
    encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
}

/// RFC 7523 client assertion for `client_par` aimed at `audience`.
pub fn client_assertion(audience: &str, jti: &str) -> String {
    rs256(&json!({
        "iss": CONFIDENTIAL_CLIENT,
        "sub": CONFIDENTIAL_CLIENT,
        "aud": audience,
        "jti": jti,
        "exp": now() + 600,
        "iat": now()
    }))
}

/// Compact JWE with RSA1_5 key wrapping to the server key and A128CBC-HS256 content.
pub fn encrypt_to_server(payload: &str, cty: Option<&str>) -> String {
    let server = RsaPrivateKey::from_pkcs1_pem(SERVER_RSA).unwrap();
    let mut cek = [0u8; 32];
    OsRng.fill_bytes(&mut cek);
    let wrapped = RsaPublicKey::from(&server)
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, &cek)
        .unwrap();

    let mut header = json!({"alg": "RSA1_5", "enc": "A128CBC-HS256"});
    if let Some(cty) = cty {
        header["cty"] = Value::from(cty);
    }
    let protected = URL_SAFE_NO_PAD.encode(header.to_string());

    let mut iv = [0u8; 16];
    OsRng.fill_bytes(&mut iv);
    let (mac_key, enc_key) = cek.split_at(16);
    let ciphertext = cbc::Encryptor::<aes::Aes128>::new_from_slices(enc_key, &iv)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(payload.as_bytes());

    let al = ((protected.len() as u64) * 8).to_be_bytes();
    let mut mac = <HmacSha256 as Mac>::new_from_slice(mac_key).unwrap();
    mac.update(protected.as_bytes());
    mac.update(&iv);
    mac.update(&ciphertext);
    mac.update(&al);
    let tag = mac.finalize().into_bytes();

    [
        protected,
        URL_SAFE_NO_PAD.encode(wrapped),
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(ciphertext),
        URL_SAFE_NO_PAD.encode(&tag[..16]),
    ]
    .join(".")
}

/// Compact JWE using `dir` with a key derived from the client secret and A128GCM content.
pub fn encrypt_with_secret(payload: &str, secret: &str) -> String {
    let key = oidc_par::jose::jwe::derive_secret_key(secret, 16);
    let protected = URL_SAFE_NO_PAD.encode(json!({"alg": "dir", "enc": "A128GCM"}).to_string());

    let mut iv = [0u8; 12];
    OsRng.fill_bytes(&mut iv);
    let mut sealed = Aes128Gcm::new_from_slice(&key)
        .unwrap()
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: payload.as_bytes(),
                aad: protected.as_bytes(),
            },
        )
        .unwrap();
    let tag = sealed.split_off(sealed.len() - 16);

    [
        protected,
        String::new(),
        URL_SAFE_NO_PAD.encode(iv),
        URL_SAFE_NO_PAD.encode(sealed),
        URL_SAFE_NO_PAD.encode(tag),
    ]
    .join(".")
}
