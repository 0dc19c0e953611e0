use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

/// Scopes a resource owner has already consented to for a client.
pub trait GrantStore: Send + Sync {
    fn granted_scopes(&self, username: &str, client_id: &str) -> BTreeSet<String>;
    fn grant(&self, username: &str, client_id: &str, scopes: &[String]);
}

#[derive(Default)]
pub struct InMemoryGrantStore {
    grants: RwLock<HashMap<(String, String), BTreeSet<String>>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GrantStore for InMemoryGrantStore {
    fn granted_scopes(&self, username: &str, client_id: &str) -> BTreeSet<String> {
        let grants = self.grants.read().unwrap_or_else(|e| e.into_inner());
        grants
            .get(&(username.to_string(), client_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn grant(&self, username: &str, client_id: &str, scopes: &[String]) {
        let mut grants = self.grants.write().unwrap_or_else(|e| e.into_inner());
        grants
            .entry((username.to_string(), client_id.to_string()))
            .or_default()
            .extend(scopes.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_accumulate_per_user_and_client() {
        let store = InMemoryGrantStore::new();
        store.grant("user1", "client1", &["openid".into()]);
        store.grant("user1", "client1", &["g_profile".into()]);
        store.grant("user2", "client1", &["scope3".into()]);

        let granted = store.granted_scopes("user1", "client1");
        assert_eq!(granted.len(), 2);
        assert!(granted.contains("openid"));
        assert!(store.granted_scopes("user1", "client2").is_empty());
    }
}
