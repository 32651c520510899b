//! The decode-pipeline boundary: from a raw `(barcode, format)` pair to a
//! scan event on the wire.
//!
//! Barcode decoders re-report the same code many times per second while it is
//! in view; [`ScanDebouncer`] collapses those into one accepted decode per
//! gap.  [`ScanForwarder`] is the single function the pipeline calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use scanlink_core::ScanEvent;

use crate::infrastructure::connection::ScannerClient;

/// Default minimum gap between accepted decodes.
pub const DEFAULT_SCAN_GAP: Duration = Duration::from_millis(800);

/// Drops decodes that arrive too soon after the previous accepted one.
#[derive(Debug)]
pub struct ScanDebouncer {
    min_gap: Duration,
    last_accepted: Option<Instant>,
}

impl ScanDebouncer {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_accepted: None,
        }
    }

    /// Returns `true` when this decode should be processed, and records it
    /// as the most recent accepted one.
    pub fn accept(&mut self) -> bool {
        let now = Instant::now();
        match self.last_accepted {
            Some(previous) if now.duration_since(previous) < self.min_gap => false,
            _ => {
                self.last_accepted = Some(now);
                true
            }
        }
    }
}

impl Default for ScanDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_GAP)
    }
}

/// Binds the decode pipeline to the connection client.
///
/// The pipeline calls [`on_decode`] once per decoded barcode; everything
/// after that point (debounce, event construction, at-most-once send) is
/// handled here.
///
/// [`on_decode`]: Self::on_decode
pub struct ScanForwarder {
    client: Arc<ScannerClient>,
    device_id: String,
    debouncer: ScanDebouncer,
}

impl ScanForwarder {
    pub fn new(
        client: Arc<ScannerClient>,
        device_id: impl Into<String>,
        debouncer: ScanDebouncer,
    ) -> Self {
        Self {
            client,
            device_id: device_id.into(),
            debouncer,
        }
    }

    /// Handles one decoded `(barcode, format)` pair from the pipeline.
    ///
    /// Empty decodes and decodes within the debounce gap are ignored; the
    /// rest become scan events, which are dropped silently when the link is
    /// down.
    pub async fn on_decode(&mut self, barcode: &str, format: &str) {
        if barcode.is_empty() {
            return;
        }
        if !self.debouncer.accept() {
            debug!("decode within debounce gap; ignored");
            return;
        }
        let event = ScanEvent::now(self.device_id.as_str(), barcode, format);
        self.client.send_scan(&event).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
