//! Device configuration types.
//!
//! [`DeviceConfig`] holds the endpoint, the pairing credential, the identity
//! advertised to the host, and the two timer intervals the connection state
//! machine runs on.  The struct is plain data: persistence (if any) and UI
//! editing belong to the embedding app, which swaps a whole new value in via
//! `ScannerClient::update_config`.

use std::time::Duration;

use uuid::Uuid;

/// Default host address shown to a user who has not paired yet.
pub const DEFAULT_SERVER_HOST: &str = "192.168.0.10";

/// Default relay port, matching the host side.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default pairing credential placeholder, matching the host side.
pub const DEFAULT_CREDENTIAL: &str = "PAIRING";

/// How often a heartbeat is sent while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long after a transport loss the single reconnect attempt fires.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1500);

/// Runtime settings for one device session.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Host name or IP of the desktop relay.
    pub server_host: String,
    /// Relay port.
    pub server_port: u16,
    /// Shared secret presented in the `Authorization` header.
    pub credential: String,
    /// Opaque identity presented in the `X-Device-Id` header.  Not required
    /// to be unique; the host tracks connections, not identities.
    pub device_id: String,
    /// Heartbeat cadence while connected.
    pub heartbeat_interval: Duration,
    /// Fixed delay before the one pending reconnect attempt.
    pub reconnect_delay: Duration,
}

impl DeviceConfig {
    /// The WebSocket endpoint this configuration points at.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.server_host, self.server_port)
    }

    /// Generates a fresh device identity for installs that have none yet.
    pub fn generate_device_id() -> String {
        format!("SCANNER-{}", Uuid::new_v4())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            credential: DEFAULT_CREDENTIAL.to_string(),
            device_id: Self::generate_device_id(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
