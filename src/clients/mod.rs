//! Registered clients and the identity collaborators the authorization
//! endpoint leans on (granted scopes, logged-in sessions).

pub mod grants;
pub mod session;

use std::collections::HashMap;
use std::sync::RwLock;

use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use grants::{GrantStore, InMemoryGrantStore};
pub use session::{session_cookie, InMemorySessionStore, SessionResolver, UserSession};

/// Client authentication methods understood at the PAR and token endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    None,
    ClientSecretBasic,
    ClientSecretPost,
    ClientSecretJwt,
    PrivateKeyJwt,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::ClientSecretBasic => "client_secret_basic",
            AuthMethod::ClientSecretPost => "client_secret_post",
            AuthMethod::ClientSecretJwt => "client_secret_jwt",
            AuthMethod::PrivateKeyJwt => "private_key_jwt",
        }
    }
}

/// A client as registered with the authorization server.
///
/// Anything not modelled explicitly (public key, JWKS, RAR types, ...) lands
/// in `properties` under the name the plugin configuration points at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub confidential: bool,
    #[serde(default)]
    pub redirect_uri: Vec<String>,
    #[serde(default)]
    pub authorization_type: Vec<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub token_endpoint_auth_method: Vec<AuthMethod>,
    #[serde(flatten)]
    pub properties: serde_json::Map<String, Value>,
}

fn default_enabled() -> bool {
    true
}

impl ClientRecord {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            name: String::new(),
            client_secret: None,
            confidential: false,
            redirect_uri: Vec::new(),
            authorization_type: Vec::new(),
            scope: Vec::new(),
            enabled: true,
            token_endpoint_auth_method: Vec::new(),
            properties: serde_json::Map::new(),
        }
    }

    /// Registered methods, or the tier default when none were registered.
    pub fn allowed_methods(&self) -> Vec<AuthMethod> {
        if !self.token_endpoint_auth_method.is_empty() {
            return self.token_endpoint_auth_method.clone();
        }
        if self.confidential {
            vec![AuthMethod::ClientSecretBasic, AuthMethod::ClientSecretPost]
        } else {
            vec![AuthMethod::None]
        }
    }

    pub fn allows(&self, method: AuthMethod) -> bool {
        if self.confidential && method == AuthMethod::None {
            return false;
        }
        self.allowed_methods().contains(&method)
    }

    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    /// A property holding either one string or a list of strings.
    pub fn property_list(&self, name: &str) -> Vec<String> {
        match self.properties.get(name) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Parse the JWKS property, stored either as an object or as JSON text.
    pub fn jwks(&self, name: &str) -> Option<JwkSet> {
        let parsed = match self.properties.get(name)? {
            Value::String(text) => serde_json::from_str(text),
            other => serde_json::from_value(other.clone()),
        };
        match parsed {
            Ok(set) => Some(set),
            Err(e) => {
                log::warn!("Client {} has an unreadable {} property: {}", self.client_id, name, e);
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Read access to registered clients. Administration lives elsewhere.
pub trait ClientRegistry: Send + Sync {
    fn get(&self, client_id: &str) -> Option<ClientRecord>;
}

#[derive(Default)]
pub struct InMemoryClientRegistry {
    clients: RwLock<HashMap<String, ClientRecord>>,
}

impl InMemoryClientRegistry {
    pub fn new(clients: impl IntoIterator<Item = ClientRecord>) -> Self {
        let map = clients
            .into_iter()
            .map(|c| (c.client_id.clone(), c))
            .collect();
        Self {
            clients: RwLock::new(map),
        }
    }
}

impl ClientRegistry for InMemoryClientRegistry {
    fn get(&self, client_id: &str) -> Option<ClientRecord> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.get(client_id).cloned()
    }
}
