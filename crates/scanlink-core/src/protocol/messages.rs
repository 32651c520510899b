//! JSON message types for the device-facing WebSocket protocol.
//!
//! Every message is a JSON object with a `"type"` field that identifies the
//! variant; all other fields are flattened into the same object:
//!
//! ```json
//! {"type":"SCAN","deviceId":"DEV-1","barcode":"0123456789","format":"EAN13","timestamp":"2024-01-01T00:00:00.000Z"}
//! {"type":"PING","deviceId":"DEV-1","ts":"2024-01-01T00:00:05.000Z"}
//! ```
//!
//! Serde's `#[serde(tag = "type")]` attribute handles the discriminant.
//!
//! # Forward compatibility
//!
//! Unknown message kinds are not an error: the host silently ignores them so
//! newer devices can talk to older hosts.  Only a JSON *syntax* failure is an
//! error; it is the one condition that terminates a connection (close code
//! 4002).  [`parse_device_message`] encodes this split.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A single decoded barcode, produced by the device at the moment of decode
/// and consumed exactly once by the host's forwarding step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    /// Opaque identity of the scanning device.  Not guaranteed unique.
    pub device_id: String,
    /// The decoded barcode content.  Non-empty by construction on the device.
    pub barcode: String,
    /// Symbology name as reported by the decoder (e.g. `EAN13`, `QR`).
    pub format: String,
    /// ISO-8601 timestamp of the decode, stamped by the device.
    pub timestamp: String,
}

impl ScanEvent {
    /// Builds a scan event stamped with the current UTC time.
    pub fn now(device_id: impl Into<String>, barcode: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            barcode: barcode.into(),
            format: format.into(),
            timestamp: iso_timestamp_now(),
        }
    }
}

/// Keepalive message.  Carries no business payload; the host may ignore or
/// log it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub device_id: String,
    /// ISO-8601 timestamp of the heartbeat.
    pub ts: String,
}

impl Heartbeat {
    /// Builds a heartbeat stamped with the current UTC time.
    pub fn now(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ts: iso_timestamp_now(),
        }
    }
}

/// All messages a device can send to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeviceMessage {
    /// A decoded barcode to relay to the host's output sink.
    #[serde(rename = "SCAN")]
    Scan(ScanEvent),
    /// Keepalive; accepted but never forwarded to the sink.
    #[serde(rename = "PING")]
    Ping(Heartbeat),
}

/// Parses one inbound text frame.
///
/// Returns:
///
/// - `Err(_)` when the frame is not valid JSON; the caller closes the
///   connection with [`super::handshake::close_code::MALFORMED_MESSAGE`].
/// - `Ok(None)` when the frame is valid JSON but not a recognized message
///   (unknown `type`, missing discriminant, or unexpected shape), which is ignored.
/// - `Ok(Some(msg))` for a well-formed `SCAN` or `PING`.
pub fn parse_device_message(raw: &str) -> Result<Option<DeviceMessage>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    Ok(serde_json::from_value(value).ok())
}

/// Current UTC time as an ISO-8601 string with millisecond precision,
/// e.g. `2024-01-01T00:00:00.000Z`.
///
/// Every timestamp that crosses the wire or lands in a connection record is
/// stamped through this one helper so both ends agree on the format.
pub fn iso_timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
