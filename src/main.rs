use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{self, EnvFilter};

use oidc_par::store::reaper;
use oidc_par::{AppState, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Logging goes to stderr; `log` records from the library arrive through
    // the subscriber's tracing-log bridge.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // Config path: first argument, then OIDC_PAR_CONFIG, then ./config.yaml
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("OIDC_PAR_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"));

    let config = ServerConfig::load(&path)
        .with_context(|| format!("Cannot load configuration from {}", path.display()))?;
    tracing::info!("oidc-par starting with {}", path.display());

    let state = AppState::from_config(&config).context("Cannot initialise PAR service")?;

    tokio::spawn(reaper::run(
        state.store.clone(),
        Duration::from_secs(config.reaper_interval),
    ));

    oidc_par::server::serve(state, &config.bind)
        .await
        .inspect_err(|e| tracing::error!("serving error: {e:?}"))
        .with_context(|| format!("Cannot serve on {}", config.bind))?;

    Ok(())
}
