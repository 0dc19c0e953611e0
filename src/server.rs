use std::sync::Arc;
use std::time::Duration;

use axum::{extract::DefaultBodyLimit, routing, Router};
use rsa::RsaPrivateKey;

use crate::clients::{
    ClientRegistry, GrantStore, InMemoryClientRegistry, InMemoryGrantStore, InMemorySessionStore,
    SessionResolver, UserSession,
};
use crate::config::{ConfigError, Endpoints, PluginConfig, ServerConfig};
use crate::jose::jwe;
use crate::oauth::client_auth::ClientAuthenticator;
use crate::oauth::decoder::RequestDecoder;
use crate::oauth::issuer::{AuthorizationIssuer, InMemoryIssuer};
use crate::oauth::jti::JtiCache;
use crate::oauth::{authorize, par, token};
use crate::store::{InMemoryPushedRequestStore, PushedRequestStore, SqlitePushedRequestStore};

/// Request objects and assertions are small; anything bigger is refused early.
const BODY_LIMIT: usize = 256 * 1024;

/// Everything the handlers share. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PluginConfig>,
    pub endpoints: Arc<Endpoints>,
    pub server_key: Option<Arc<RsaPrivateKey>>,
    pub clients: Arc<dyn ClientRegistry>,
    pub grants: Arc<dyn GrantStore>,
    pub sessions: Arc<dyn SessionResolver>,
    pub store: Arc<dyn PushedRequestStore>,
    pub issuer: Arc<dyn AuthorizationIssuer>,
    pub jti_cache: Arc<JtiCache>,
}

impl AppState {
    /// Build the state from a loaded configuration: seeds clients, sessions
    /// and grants, opens the configured store and parses the server key.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        let server_key = match &config.plugin.key {
            Some(pem) => Some(Arc::new(
                jwe::parse_private_key(pem).map_err(|e| ConfigError::Invalid(format!("key: {}", e)))?,
            )),
            None => None,
        };

        let sessions = InMemorySessionStore::new();
        let grants = InMemoryGrantStore::new();
        for user in &config.users {
            if let Some(session) = &user.session {
                sessions.insert(
                    session.clone(),
                    UserSession {
                        username: user.username.clone(),
                        claims: user.claims.clone(),
                    },
                );
            }
            for (client_id, scopes) in &user.grants {
                grants.grant(&user.username, client_id, scopes);
            }
        }

        let store: Arc<dyn PushedRequestStore> = match &config.store_path {
            Some(path) => {
                log::info!("PAR store: sqlite at {}", path.display());
                Arc::new(SqlitePushedRequestStore::open(path)?)
            }
            None => {
                log::info!("PAR store: in-memory");
                Arc::new(InMemoryPushedRequestStore::new())
            }
        };

        let plugin = &config.plugin;
        let issuer = InMemoryIssuer::new(
            Duration::from_secs(plugin.code_duration),
            Duration::from_secs(plugin.access_token_duration),
        );

        log::info!(
            "PAR service configured: clients={} users={} par_required={} rar={}",
            config.clients.len(),
            config.users.len(),
            plugin.oauth_par_required,
            plugin.oauth_rar_allowed
        );

        Ok(Self {
            config: Arc::new(plugin.clone()),
            endpoints: Arc::new(config.endpoints()),
            server_key,
            clients: Arc::new(InMemoryClientRegistry::new(config.clients.clone())),
            grants: Arc::new(grants),
            sessions: Arc::new(sessions),
            store,
            issuer: Arc::new(issuer),
            jti_cache: Arc::new(JtiCache::new(plugin.client_auth_jti_cache_size)),
        })
    }

    pub fn decoder(&self) -> RequestDecoder<'_> {
        RequestDecoder {
            config: &self.config,
            clients: self.clients.as_ref(),
            server_key: self.server_key.as_deref(),
        }
    }

    pub fn authenticator(&self) -> ClientAuthenticator<'_> {
        ClientAuthenticator {
            config: &self.config,
            clients: self.clients.as_ref(),
            jti_cache: &self.jti_cache,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let endpoints = state.endpoints.clone();
    Router::new()
        .route(&endpoints.route("par"), routing::post(par::push))
        .route(&endpoints.route("auth"), routing::get(authorize::authorize))
        .route(&endpoints.route("token"), routing::post(token::token_exchange))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    log::info!("PAR service listening on {}", bind);
    axum::serve(listener, app).await
}
