//! Standalone Canopy client: connects to a coordinator and serves its
//! hierarchy and session commands with a headless browsing context.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use canopy_client::browser::MemoryBrowser;
use canopy_client::{ClientConfig, ClientState, NodeRegistry, Router};
use canopy_net::spawn_link;
use canopy_store::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("canopy_client=debug,canopy_net=debug,canopy_store=info,warn")
        }))
        .init();

    info!("Starting Canopy client v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration and open the registry
    // -----------------------------------------------------------------------
    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = match &config.db_path {
        Some(path) => Database::open_at(path)
            .with_context(|| format!("opening registry at {}", path.display()))?,
        None => Database::new().context("opening registry in the data directory")?,
    };
    let registry = NodeRegistry::new(db);

    if let Some((user_id, username)) = &config.startup_user {
        let user = registry.register_user(&config.client_id, user_id, username)?;
        info!(user_id = %user.user_id, node_id = ?user.node_id, "Startup user registered");
    }

    // -----------------------------------------------------------------------
    // 3. Connect and route until the link closes or we are interrupted
    // -----------------------------------------------------------------------
    let state = Arc::new(ClientState::new(config.client_id.clone()));
    let browser = Arc::new(MemoryBrowser::new());
    let (link, notifications) = spawn_link(config.link_config());
    let router = Router::new(registry, state, browser, link.clone(), &config);

    tokio::select! {
        _ = router.run(notifications) => {
            info!("Router stopped");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for shutdown signal")?;
            info!("Shutdown signal received");
            if let Err(e) = link.shutdown().await {
                tracing::warn!(error = %e, "Link already closed");
            }
        }
    }

    Ok(())
}
