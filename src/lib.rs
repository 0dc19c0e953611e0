pub mod clients;
pub mod config;
pub mod error;
pub mod jose;
pub mod oauth;
pub mod server;
pub mod store;

pub use config::{PluginConfig, ServerConfig};
pub use error::{ParError, ParResult};
pub use server::{router, AppState};
