#![deny(clippy::all)]

mod config;
mod connection;
mod lifecycle;
mod protocol;
mod session;
mod surface;
mod transcript;

use anyhow::Context;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    tracing_subscriber::fmt::init();

    // Optional .env before reading VOICEFRONT_* overrides
    if let Ok(path) = dotenvy::dotenv() {
        info!(path = %path.display(), "Loaded environment from .env");
    }

    let config = config::load().context("Failed to load configuration")?;
    info!(
        server_url = %config.server.url,
        auto_start_on_connect = config.behavior.auto_start_on_connect,
        disconnect_on_hide = config.behavior.disconnect_on_hide,
        "Starting voicefront"
    );

    let ui_tx = surface::channel();
    surface::spawn_console_surface(ui_tx.subscribe());

    let client = connection::VoiceClient::new(config, ui_tx);

    // Initial connection; failure is not fatal, the next lifecycle trigger
    // (show/reload) tries again.
    client
        .handle_lifecycle(lifecycle::LifecycleEvent::Ready)
        .await;
    if !client.session().connected {
        warn!("Voice service unreachable, use 'show' or 'r' to retry");
    }

    lifecycle::run_driver(client)
        .await
        .context("Console driver failed")?;

    Ok(())
}
