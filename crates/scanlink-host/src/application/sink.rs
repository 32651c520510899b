//! Output-sink seam: where validated scans leave the relay.
//!
//! The gateway does not know what happens to a barcode after delivery: the
//! sink might inject keystrokes into the focused window, write a file, or
//! print to stdout.  Two guarantees are made here:
//!
//! 1. All deliveries go through a single worker task, so two devices scanning
//!    at the same instant can never interleave partial writes at the sink.
//! 2. A sink failure is caught and logged; it never disturbs the connection
//!    handling loops (the relay is best-effort, at-most-once).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use scanlink_core::ScanEvent;

/// Consumer of delivered barcodes.
///
/// Implementations may perform I/O; errors are reported to the worker, which
/// logs and moves on.  The relay never retries or confirms delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScanSink: Send + Sync {
    async fn deliver(&self, barcode: &str) -> anyhow::Result<()>;
}

/// Spawns the single delivery worker.
///
/// Scan events arrive on `scans` in connection order per device; the worker
/// serializes all of them onto the one sink.  The task ends when every sender
/// has been dropped.
pub fn spawn_sink_worker(
    sink: Arc<dyn ScanSink>,
    mut scans: mpsc::Receiver<ScanEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = scans.recv().await {
            match sink.deliver(&event.barcode).await {
                Ok(()) => debug!("delivered {} for {}", event.barcode, event.device_id),
                Err(e) => warn!("sink delivery failed for {}: {e:#}", event.device_id),
            }
        }
    })
}

/// Sink that writes each barcode as a line on stdout.
///
/// Stands in for the OS-level injection sink in the packaged desktop app;
/// useful on its own for piping scans into another program.
pub struct StdoutSink;

#[async_trait]
impl ScanSink for StdoutSink {
    async fn deliver(&self, barcode: &str) -> anyhow::Result<()> {
        println!("{barcode}");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
