//! Pushed request persistence.
//!
//! A pushed request is `issued` until it is either consumed exactly once or
//! its lifetime runs out. Expiry is checked at every lookup; the reaper only
//! reclaims space.

pub mod memory;
pub mod reaper;
pub mod sqlite;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::oauth::types::ValidatedRequest;

pub use memory::InMemoryPushedRequestStore;
pub use sqlite::SqlitePushedRequestStore;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
/// 43 Base62 characters carry a little over 256 bits.
pub const TOKEN_LEN: usize = 43;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Token already in use")]
    Conflict,

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushedAuthorizationRequest {
    /// The random part of the `request_uri`, without prefix.
    pub token: String,
    pub client_id: String,
    pub parameters: ValidatedRequest,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PushedAuthorizationRequest {
    pub fn new(token: String, parameters: ValidatedRequest, lifetime_secs: u64) -> Self {
        let issued_at = Utc::now();
        let lifetime = i64::try_from(lifetime_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self {
            token,
            client_id: parameters.client_id.clone(),
            parameters,
            issued_at,
            expires_at: issued_at.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub trait PushedRequestStore: Send + Sync {
    /// Persist a new record. Fails with [`StoreError::Conflict`] when the
    /// token is already taken.
    fn create(&self, request: PushedAuthorizationRequest) -> Result<(), StoreError>;

    /// Look a record up without changing it. Expired records read as absent.
    fn get(&self, token: &str) -> Result<Option<PushedAuthorizationRequest>, StoreError>;

    /// Atomically read and remove a live record. Of two concurrent callers
    /// at most one receives it.
    fn consume(&self, token: &str) -> Result<Option<PushedAuthorizationRequest>, StoreError>;

    /// Drop expired records. Returns how many were removed.
    fn sweep_expired(&self) -> Result<usize, StoreError>;
}

/// A fresh random token from the Base62 alphabet.
pub fn mint_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}
