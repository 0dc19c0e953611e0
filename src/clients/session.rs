use std::collections::HashMap;
use std::sync::RwLock;

use axum::http::{header, HeaderMap};
use serde_json::{Map, Value};

/// A logged-in resource owner.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSession {
    pub username: String,
    /// Profile claims, used to enrich RAR details at issuance.
    pub claims: Map<String, Value>,
}

/// Resolves a session cookie value to a user. Login itself happens elsewhere.
pub trait SessionResolver: Send + Sync {
    fn resolve(&self, session_id: &str) -> Option<UserSession>;
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, UserSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: impl Into<String>, session: UserSession) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session_id.into(), session);
    }
}

impl SessionResolver for InMemorySessionStore {
    fn resolve(&self, session_id: &str) -> Option<UserSession> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).cloned()
    }
}

/// Value of cookie `name` from the request headers.
pub fn session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_lookup_by_name() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "theme=dark; SESSION=abc123".parse().unwrap());
        assert_eq!(session_cookie(&headers, "SESSION"), Some("abc123".into()));
        assert_eq!(session_cookie(&headers, "OTHER"), None);
    }

    #[test]
    fn empty_cookie_is_no_session() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "SESSION=".parse().unwrap());
        assert_eq!(session_cookie(&headers, "SESSION"), None);
    }

    #[test]
    fn resolve_known_session() {
        let store = InMemorySessionStore::new();
        store.insert(
            "abc",
            UserSession {
                username: "user1".into(),
                claims: Map::new(),
            },
        );
        assert_eq!(store.resolve("abc").unwrap().username, "user1");
        assert!(store.resolve("nope").is_none());
    }
}
