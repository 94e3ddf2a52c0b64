//! # relay
//!
//! WebSocket relay server binary: loads settings, starts the server, and
//! shuts down gracefully on Ctrl-C or SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::RelayServer;
use relay_server::shutdown::{DEFAULT_DRAIN_TIMEOUT, wait_for_signal};
use relay_settings::RelaySettings;
use tracing::{info, warn};

/// WebSocket relay server.
#[derive(Parser, Debug)]
#[command(name = "relay", about = "WebSocket message relay server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file. Defaults to `~/.relay/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Seconds to wait for connections to drain on shutdown.
    #[arg(long, default_value_t = DEFAULT_DRAIN_TIMEOUT.as_secs())]
    shutdown_timeout: u64,
}

impl Cli {
    /// Apply CLI flags over loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(relay_settings::settings_path);
    let mut settings = relay_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    relay_core::logging::init_subscriber(&settings.logging.level);
    let metrics =
        relay_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    info!(
        history_capacity = settings.relay.history_capacity,
        history_scope = ?settings.relay.history_scope,
        transform = ?settings.relay.transform,
        echo_to_sender = settings.relay.echo_to_sender,
        "starting relay"
    );
    let server = RelayServer::new(settings, metrics);
    let handle = server.listen().await.context("Failed to bind listener")?;
    info!(addr = %handle.local_addr(), "relay ready");

    wait_for_signal().await;

    let timeout = Duration::from_secs(args.shutdown_timeout);
    if !server.graceful_shutdown(handle, timeout).await {
        warn!(?timeout, "shutdown did not complete in time");
    }
    info!("relay stopped");
    Ok(())
}
