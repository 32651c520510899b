//! scanlink-host — entry point.
//!
//! Runs the relay gateway as a standalone process: devices on the LAN pair
//! with the credential, and every accepted scan is written to stdout (one
//! barcode per line) so it can be piped into whatever should consume it.
//! The packaged desktop application embeds [`scanlink_host::RelayGateway`]
//! the same way and swaps the sink for OS-level injection.
//!
//! ```text
//! scanlink-host [OPTIONS]
//!
//! Options:
//!   --port       <PORT>    Relay listener port [default: 8080]
//!   --credential <SECRET>  Pairing credential devices must present
//! ```
//!
//! Both options can also come from the environment (`SCANLINK_PORT`,
//! `SCANLINK_CREDENTIAL`); CLI arguments take precedence.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scanlink_host::infrastructure::local_ip::local_lan_ip;
use scanlink_host::{GatewayEvent, PairingInfo, RelayGateway, StdoutSink, DEFAULT_CREDENTIAL, DEFAULT_PORT};

/// Wi-Fi barcode scanner relay, host side.
#[derive(Debug, Parser)]
#[command(
    name = "scanlink-host",
    about = "Accepts paired scanner devices over the LAN and relays their scans",
    version
)]
struct Cli {
    /// TCP port the relay listens on (all interfaces).
    #[arg(long, default_value_t = DEFAULT_PORT, env = "SCANLINK_PORT")]
    port: u16,

    /// Pairing credential devices must present in the Authorization header.
    #[arg(long, default_value = DEFAULT_CREDENTIAL, env = "SCANLINK_CREDENTIAL")]
    credential: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let (mut gateway, mut events) = RelayGateway::new(Arc::new(StdoutSink));
    gateway
        .start(cli.port, &cli.credential)
        .await
        .context("failed to start relay gateway")?;

    // What a pairing UI would encode into a QR code.
    let pairing = PairingInfo::new(local_lan_ip().to_string(), cli.port, cli.credential.clone());
    info!(
        "pairing payload: {}",
        serde_json::to_string(&pairing).context("failed to encode pairing payload")?
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Some(GatewayEvent::Log(line)) => info!("{line}"),
                Some(GatewayEvent::ClientsChanged(clients)) => {
                    info!("{} device(s) connected", clients.len());
                }
                None => break,
            }
        }
    }

    gateway.stop().await;
    info!("scanlink host stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
