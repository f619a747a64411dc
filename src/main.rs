// Draft room server entry point.
//
// Startup sequence:
// 1. Initialize tracing
// 2. Load config
// 3. Create the room registry
// 4. Spawn the WebSocket server task
// 5. Wait for shutdown signal, then stop the server

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use draft_room::config;
use draft_room::room::RoomRegistry;
use draft_room::ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Draft room server starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: ws_port={}, channel_capacity={}, client_buffer={}",
        config.server.ws_port, config.draft.channel_capacity, config.draft.client_buffer
    );

    // 3. Create the room registry
    let registry = Arc::new(RoomRegistry::new(
        config.draft.channel_capacity,
        config.draft.client_buffer,
    ));

    // 4. Spawn the WebSocket server task
    let ws_port = config.server.ws_port;
    let server_registry = Arc::clone(&registry);
    let ws_handle = tokio::spawn(async move {
        match ws_server::bind(ws_port).await {
            Ok(listener) => {
                if let Err(e) = ws_server::run(listener, server_registry).await {
                    error!("WebSocket server error: {e}");
                }
            }
            Err(e) => {
                error!("Failed to bind WebSocket server on port {ws_port}: {e}");
            }
        }
    });

    info!("Server ready. WebSocket listening on 127.0.0.1:{ws_port}");

    // 5. Wait for shutdown signal, then stop the server
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    ws_handle.abort();

    info!("Draft room server shut down cleanly");
    Ok(())
}

/// Initialize tracing to stderr with an env-filter override
/// (`RUST_LOG=draft_room=debug` and friends).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("draft_room=info,draftroom=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
