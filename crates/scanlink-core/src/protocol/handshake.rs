//! Handshake contract: connection-establishment metadata and the validation
//! rules the host applies before a device may send any application message.
//!
//! The credential and the device identity travel as HTTP upgrade headers,
//! not as a first message:
//!
//! ```text
//! Authorization: <credential>
//! X-Device-Id:   <device identity>
//! ```
//!
//! Validation is ordered; the first failure wins:
//!
//! 1. The presented credential must equal the configured credential exactly
//!    (byte-for-byte).  Mismatch → close 4001, never registered.
//! 2. The peer address must start with one of the accepted private-network
//!    prefixes.  Mismatch → close 4003, never registered.

use thiserror::Error;

/// Header carrying the pairing credential.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Header carrying the device identity.
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Identity recorded for a device that omitted the identity header.
pub const UNKNOWN_DEVICE_ID: &str = "UNKNOWN";

/// Application-defined WebSocket close codes used by the host.
pub mod close_code {
    /// Credential did not match the configured value.
    pub const INVALID_CREDENTIAL: u16 = 4001;
    /// Inbound frame was not valid JSON.
    pub const MALFORMED_MESSAGE: u16 = 4002;
    /// Peer address outside the accepted private-network ranges.
    pub const FOREIGN_ORIGIN: u16 = 4003;
}

/// Why a connection attempt was rejected at handshake time.
///
/// Rejections are terminal for the connection; the host never retries them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeRejection {
    #[error("invalid credential")]
    InvalidCredential,
    #[error("peer address {0} is outside the accepted local network ranges")]
    ForeignOrigin(String),
}

impl HandshakeRejection {
    /// The WebSocket close code sent for this rejection.
    pub fn close_code(&self) -> u16 {
        match self {
            Self::InvalidCredential => close_code::INVALID_CREDENTIAL,
            Self::ForeignOrigin(_) => close_code::FOREIGN_ORIGIN,
        }
    }
}

/// Returns `true` when `peer_ip` falls inside the accepted private ranges.
///
/// This is a literal prefix match, intentionally reproducing the reference
/// behavior: `172.16.` covers only one /24-shaped slice of the 172.16/12
/// private range, and IPv6 or IPv4-mapped textual forms never match.
pub fn is_private_origin(peer_ip: &str) -> bool {
    peer_ip.starts_with("192.168.") || peer_ip.starts_with("10.") || peer_ip.starts_with("172.16.")
}

/// Validates connection-establishment metadata, in order: credential first,
/// then peer origin.
///
/// `presented` is the raw `Authorization` header value, `None` when the
/// header was absent.
///
/// # Errors
///
/// Returns the first failing [`HandshakeRejection`].
pub fn validate_handshake(
    presented: Option<&str>,
    configured: &str,
    peer_ip: &str,
) -> Result<(), HandshakeRejection> {
    match presented {
        Some(value) if value == configured => {}
        _ => return Err(HandshakeRejection::InvalidCredential),
    }
    if !is_private_origin(peer_ip) {
        return Err(HandshakeRejection::ForeignOrigin(peer_ip.to_string()));
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
