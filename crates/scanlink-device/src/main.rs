//! scanlink-device — entry point.
//!
//! Runs the connection client as a standalone process.  The camera decoder
//! of the packaged handheld app is replaced here by stdin: every line is
//! treated as one decoded barcode, which makes the binary usable with a
//! USB/keyboard-wedge scanner or for manual testing:
//!
//! ```text
//! scanlink-device --host 192.168.0.23 --credential PAIR1
//! 0123456789          ← typed or piped; relayed as one SCAN event
//! ```
//!
//! All options can also come from the environment (`SCANLINK_*`); CLI
//! arguments take precedence.

use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scanlink_device::{
    DeviceConfig, ScanDebouncer, ScanForwarder, ScannerClient, DEFAULT_CREDENTIAL,
    DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT,
};

/// Wi-Fi barcode scanner relay, device side.
#[derive(Debug, Parser)]
#[command(
    name = "scanlink-device",
    about = "Pairs with a scanlink host and relays decoded barcodes",
    version
)]
struct Cli {
    /// Host name or IP of the desktop relay.
    #[arg(long, default_value = DEFAULT_SERVER_HOST, env = "SCANLINK_HOST")]
    host: String,

    /// Relay port.
    #[arg(long, default_value_t = DEFAULT_SERVER_PORT, env = "SCANLINK_PORT")]
    port: u16,

    /// Pairing credential, as configured on the host.
    #[arg(long, default_value = DEFAULT_CREDENTIAL, env = "SCANLINK_CREDENTIAL")]
    credential: String,

    /// Device identity advertised to the host; generated when omitted.
    #[arg(long, env = "SCANLINK_DEVICE_ID")]
    device_id: Option<String>,

    /// Symbology label attached to barcodes read from stdin.
    #[arg(long, default_value = "MANUAL")]
    format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let device_id = cli
        .device_id
        .clone()
        .unwrap_or_else(DeviceConfig::generate_device_id);

    let config = DeviceConfig {
        server_host: cli.host.clone(),
        server_port: cli.port,
        credential: cli.credential.clone(),
        device_id: device_id.clone(),
        ..DeviceConfig::default()
    };
    info!("device {device_id} connecting to {}", config.ws_url());

    let client = Arc::new(ScannerClient::new(config));

    // Surface connectivity changes the way a handheld UI would show its
    // status badge.
    let mut changes = client.subscribe();
    tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            match (&change.reason, change.connected) {
                (None, true) => info!("connected"),
                (None, false) => info!("disconnected"),
                (Some(reason), connected) => info!("connected={connected} ({reason})"),
            }
        }
    });

    client.connect().await;

    let mut forwarder = ScanForwarder::new(Arc::clone(&client), device_id, ScanDebouncer::default());
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    forwarder.on_decode(line.trim(), &cli.format).await;
                }
                Ok(None) => {
                    info!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    break;
                }
            }
        }
    }

    client.shutdown().await;
    info!("scanlink device stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
