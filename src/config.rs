//! Server and plugin configuration.
//!
//! Loaded once at startup from a JSON or YAML file and shared read-only
//! (`Arc<PluginConfig>`) by every component afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clients::ClientRecord;

pub const DEFAULT_REQUEST_URI_PREFIX: &str = "urn:ietf:params:oauth:request_uri:";

/// Upper bound for every configured lifetime, in seconds (one year).
pub const MAX_LIFETIME_SECS: u64 = 365 * 24 * 3600;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),
}

// ---------------------------------------------------------------------------
// RAR type registry
// ---------------------------------------------------------------------------

/// One entry of the `rar-types` table. The name is the table key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RarTypeDefinition {
    #[serde(skip)]
    pub name: String,
    #[serde(default, rename = "scopes")]
    pub allowed_scopes: Vec<String>,
    #[serde(default, rename = "locations")]
    pub allowed_locations: Vec<String>,
    #[serde(default, rename = "actions")]
    pub allowed_actions: Vec<String>,
    #[serde(default, rename = "datatypes")]
    pub allowed_datatypes: Vec<String>,
    /// User claims copied into the detail when a token is issued.
    #[serde(default, rename = "enriched")]
    pub enriched_claims: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Plugin configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginConfig {
    #[serde(default = "default_true")]
    pub oauth_par_allowed: bool,
    #[serde(default)]
    pub oauth_par_required: bool,
    #[serde(
        rename = "oauth-par-request_uri-prefix",
        default = "default_request_uri_prefix"
    )]
    pub request_uri_prefix: String,
    /// Lifetime of a pushed request, in seconds.
    #[serde(default = "default_par_duration")]
    pub oauth_par_duration: u64,

    #[serde(default)]
    pub oauth_rar_allowed: bool,
    #[serde(default = "default_rar_types_client_property")]
    pub rar_types_client_property: String,
    #[serde(default)]
    pub rar_allow_auth_unsigned: bool,
    #[serde(default)]
    pub rar_allow_auth_unencrypted: bool,
    #[serde(default)]
    pub rar_types: BTreeMap<String, RarTypeDefinition>,

    #[serde(default = "default_true")]
    pub pkce_allowed: bool,
    #[serde(default)]
    pub pkce_method_plain_allowed: bool,

    #[serde(default = "default_true")]
    pub request_parameter_allow: bool,
    #[serde(default = "default_true")]
    pub request_parameter_allow_encrypted: bool,
    #[serde(default = "default_pubkey_parameter")]
    pub client_pubkey_parameter: String,
    #[serde(default = "default_jwks_parameter")]
    pub client_jwks_parameter: String,

    /// Upper bound on `exp - iat` for client assertions, in seconds.
    #[serde(default = "default_assertion_max_age")]
    pub client_auth_token_max_age: i64,
    #[serde(default = "default_jti_cache_size")]
    pub client_auth_jti_cache_size: usize,

    #[serde(default = "default_true")]
    pub auth_type_code_enabled: bool,
    #[serde(default = "default_true")]
    pub auth_type_token_enabled: bool,
    #[serde(default = "default_code_duration")]
    pub code_duration: u64,
    #[serde(default = "default_access_token_duration")]
    pub access_token_duration: u64,

    /// PEM private key used to decrypt request objects encrypted to the server.
    #[serde(default)]
    pub key: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_request_uri_prefix() -> String {
    DEFAULT_REQUEST_URI_PREFIX.into()
}

fn default_par_duration() -> u64 {
    90
}

fn default_rar_types_client_property() -> String {
    "authorization_data_types".into()
}

fn default_pubkey_parameter() -> String {
    "pubkey".into()
}

fn default_jwks_parameter() -> String {
    "jwks".into()
}

fn default_assertion_max_age() -> i64 {
    3600
}

fn default_jti_cache_size() -> usize {
    10_000
}

fn default_code_duration() -> u64 {
    600
}

fn default_access_token_duration() -> u64 {
    3600
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            oauth_par_allowed: true,
            oauth_par_required: false,
            request_uri_prefix: default_request_uri_prefix(),
            oauth_par_duration: default_par_duration(),
            oauth_rar_allowed: false,
            rar_types_client_property: default_rar_types_client_property(),
            rar_allow_auth_unsigned: false,
            rar_allow_auth_unencrypted: false,
            rar_types: BTreeMap::new(),
            pkce_allowed: true,
            pkce_method_plain_allowed: false,
            request_parameter_allow: true,
            request_parameter_allow_encrypted: true,
            client_pubkey_parameter: default_pubkey_parameter(),
            client_jwks_parameter: default_jwks_parameter(),
            client_auth_token_max_age: default_assertion_max_age(),
            client_auth_jti_cache_size: default_jti_cache_size(),
            auth_type_code_enabled: true,
            auth_type_token_enabled: true,
            code_duration: default_code_duration(),
            access_token_duration: default_access_token_duration(),
            key: None,
        }
    }
}

impl PluginConfig {
    /// Fill derived fields and reject inconsistent settings.
    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        if self.request_uri_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "oauth-par-request_uri-prefix must not be empty".into(),
            ));
        }
        for (key, value) in [
            ("oauth-par-duration", self.oauth_par_duration),
            ("code-duration", self.code_duration),
            ("access-token-duration", self.access_token_duration),
        ] {
            if value == 0 || value > MAX_LIFETIME_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 1 and {}",
                    key, MAX_LIFETIME_SECS
                )));
            }
        }
        if self.oauth_par_required && !self.oauth_par_allowed {
            return Err(ConfigError::Invalid(
                "oauth-par-required needs oauth-par-allowed".into(),
            ));
        }
        if self.client_auth_token_max_age <= 0
            || self.client_auth_token_max_age as u64 > MAX_LIFETIME_SECS
        {
            return Err(ConfigError::Invalid(
                "client-auth-token-max-age must be between 1 and one year".into(),
            ));
        }
        for (name, def) in self.rar_types.iter_mut() {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("rar-types has an empty type name".into()));
            }
            def.name = name.clone();
        }
        Ok(self)
    }

    pub fn rar_type(&self, name: &str) -> Option<&RarTypeDefinition> {
        self.rar_types.get(name)
    }
}

// ---------------------------------------------------------------------------
// Server configuration
// ---------------------------------------------------------------------------

/// Seed data for the bundled in-memory session and grant stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedUser {
    pub username: String,
    /// Session cookie value that resolves to this user.
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub claims: serde_json::Map<String, serde_json::Value>,
    /// client_id -> scopes already granted by this user.
    #[serde(default)]
    pub grants: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Route prefix, e.g. `oidc_par` for `/oidc_par/par`.
    #[serde(default = "default_plugin_name")]
    pub plugin_name: String,
    /// Public base URL; endpoint audiences are derived from it.
    pub external_url: String,
    pub login_url: String,
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    /// SQLite file for pushed requests. In-memory when unset.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Seconds between expired-request sweeps.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval: u64,
    #[serde(default)]
    pub plugin: PluginConfig,
    #[serde(default)]
    pub clients: Vec<ClientRecord>,
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

fn default_bind() -> String {
    "127.0.0.1:4593".into()
}

fn default_plugin_name() -> String {
    "oidc_par".into()
}

fn default_session_cookie() -> String {
    "GLEWLWYD_SESSION_ID".into()
}

fn default_reaper_interval() -> u64 {
    60
}

impl ServerConfig {
    /// Load from `path`; `.yaml`/`.yml` is parsed as YAML, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: ServerConfig = if is_yaml {
            serde_yaml::from_str(&text)?
        } else {
            serde_json::from_str(&text)?
        };
        config.finalize()
    }

    pub fn finalize(mut self) -> Result<Self, ConfigError> {
        url::Url::parse(&self.external_url)
            .map_err(|e| ConfigError::Invalid(format!("external-url: {}", e)))?;
        if self.plugin_name.is_empty() || self.plugin_name.contains('/') {
            return Err(ConfigError::Invalid(
                "plugin-name must be a single path segment".into(),
            ));
        }
        self.plugin = self.plugin.finalize()?;
        Ok(self)
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            external_url: self.external_url.trim_end_matches('/').to_string(),
            plugin_name: self.plugin_name.clone(),
            login_url: self.login_url.clone(),
            session_cookie: self.session_cookie.clone(),
        }
    }
}

/// Externally visible locations derived from the server configuration.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub external_url: String,
    pub plugin_name: String,
    pub login_url: String,
    pub session_cookie: String,
}

impl Endpoints {
    pub fn route(&self, endpoint: &str) -> String {
        format!("/{}/{}", self.plugin_name, endpoint)
    }

    /// Absolute URL of an endpoint; this is the audience client assertions must name.
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.external_url, self.route(endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
external-url: "https://glewlwyd.tld/api/"
login-url: "https://glewlwyd.tld/login.html"
plugin-name: oidc_par
plugin:
  oauth-par-required: true
  oauth-par-request_uri-prefix: "urn:example:par:"
  oauth-rar-allowed: true
  rar-types:
    type1:
      scopes: [g_profile, openid]
      locations: ["https://type1-1.resource.tld"]
      actions: [action1-type1]
      datatypes: [type1-type1]
      enriched: [name, email]
clients:
  - client_id: client1_id
    redirect_uri: ["https://client.tld/cb"]
    authorization_type: [code]
"#;

    #[test]
    fn yaml_keys_map_to_fields() {
        let config: ServerConfig = serde_yaml::from_str(YAML).unwrap();
        let config = config.finalize().unwrap();

        assert!(config.plugin.oauth_par_required);
        assert_eq!(config.plugin.request_uri_prefix, "urn:example:par:");
        assert_eq!(config.plugin.oauth_par_duration, 90);
        let def = config.plugin.rar_type("type1").unwrap();
        assert_eq!(def.name, "type1");
        assert_eq!(def.allowed_actions, vec!["action1-type1"]);
        assert_eq!(def.enriched_claims, vec!["name", "email"]);
        assert_eq!(config.clients.len(), 1);
    }

    #[test]
    fn endpoint_urls_drop_trailing_slash() {
        let config: ServerConfig = serde_yaml::from_str(YAML).unwrap();
        let endpoints = config.endpoints();
        assert_eq!(endpoints.route("par"), "/oidc_par/par");
        assert_eq!(endpoints.url("par"), "https://glewlwyd.tld/api/oidc_par/par");
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = PluginConfig::default();
        assert!(config.oauth_par_allowed);
        assert!(!config.oauth_par_required);
        assert_eq!(config.request_uri_prefix, DEFAULT_REQUEST_URI_PREFIX);
        assert!(!config.pkce_method_plain_allowed);
        assert_eq!(config.client_pubkey_parameter, "pubkey");
    }

    #[test]
    fn zero_duration_rejected() {
        let config = PluginConfig {
            oauth_par_duration: 0,
            ..PluginConfig::default()
        };
        assert!(config.finalize().is_err());
    }

    #[test]
    fn oversized_lifetimes_rejected() {
        let par = PluginConfig {
            oauth_par_duration: u64::MAX,
            ..PluginConfig::default()
        };
        assert!(matches!(par.finalize(), Err(ConfigError::Invalid(_))));

        let code = PluginConfig {
            code_duration: MAX_LIFETIME_SECS + 1,
            ..PluginConfig::default()
        };
        assert!(code.finalize().is_err());

        let token = PluginConfig {
            access_token_duration: 0,
            ..PluginConfig::default()
        };
        assert!(token.finalize().is_err());

        let max_age = PluginConfig {
            client_auth_token_max_age: i64::MAX,
            ..PluginConfig::default()
        };
        assert!(max_age.finalize().is_err());

        let edge = PluginConfig {
            oauth_par_duration: MAX_LIFETIME_SECS,
            ..PluginConfig::default()
        };
        assert!(edge.finalize().is_ok());
    }

    #[test]
    fn required_without_allowed_rejected() {
        let config = PluginConfig {
            oauth_par_allowed: false,
            oauth_par_required: true,
            ..PluginConfig::default()
        };
        assert!(matches!(config.finalize(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn bad_external_url_rejected() {
        let mut config: ServerConfig = serde_yaml::from_str(YAML).unwrap();
        config.external_url = "not a url".into();
        assert!(config.finalize().is_err());
    }

    #[test]
    fn load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"external-url":"http://localhost:4593","login-url":"http://localhost/login"}"#,
        )
        .unwrap();
        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.plugin_name, "oidc_par");
        assert_eq!(config.bind, "127.0.0.1:4593");
    }
}
