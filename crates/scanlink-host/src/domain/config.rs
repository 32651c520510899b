//! Host configuration types.
//!
//! [`HostConfig`] is a plain struct populated by the binary's CLI layer (or
//! defaults, for tests).  The gateway itself never reads the environment and
//! never persists anything: reconfiguration at runtime goes through
//! `RelayGateway::start`, which replaces the listener wholesale.

use serde::Serialize;

/// Default relay port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default pairing credential.
///
/// A fixed placeholder so a fresh install pairs out of the box on a trusted
/// LAN; operators are expected to override it via `--credential` or
/// `SCANLINK_CREDENTIAL`.
pub const DEFAULT_CREDENTIAL: &str = "PAIRING";

/// Runtime settings for the relay gateway.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// TCP port the listener binds on all interfaces.
    pub port: u16,
    /// Shared secret devices must present in the `Authorization` header.
    pub credential: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            credential: DEFAULT_CREDENTIAL.to_string(),
        }
    }
}

/// The pairing payload a UI encodes (for example into a QR code) so a device
/// can be configured by scanning instead of typing.
///
/// Serializes as `{"host":...,"port":...,"token":...,"v":1}`; `token` is the
/// wire name of the credential field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingInfo {
    pub host: String,
    pub port: u16,
    #[serde(rename = "token")]
    pub credential: String,
    /// Payload format version.
    pub v: u8,
}

impl PairingInfo {
    pub fn new(host: impl Into<String>, port: u16, credential: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            credential: credential.into(),
            v: 1,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
