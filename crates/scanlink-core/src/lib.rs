//! # scanlink-core
//!
//! Shared library for scanlink containing the wire protocol types and the
//! handshake contract between the handheld scanning device and the desktop
//! host.
//!
//! This crate is used by both the host and device applications.  It has no
//! dependencies on sockets, async runtimes, or UI frameworks: everything here
//! is pure data plus validation logic, so both ends agree on the contract and
//! tests can exercise it without a network.
//!
//! - **`protocol::messages`** – The JSON message envelope: scan events and
//!   heartbeats, discriminated by a `"type"` field.
//! - **`protocol::handshake`** – Connection-establishment metadata (header
//!   names), application close codes, and the validation rules the host
//!   applies before accepting a device.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `scanlink_core::ScanEvent` instead of the full module path.
pub use protocol::handshake::{
    close_code, is_private_origin, validate_handshake, HandshakeRejection, AUTHORIZATION_HEADER,
    DEVICE_ID_HEADER, UNKNOWN_DEVICE_ID,
};
pub use protocol::messages::{
    iso_timestamp_now, parse_device_message, DeviceMessage, Heartbeat, ScanEvent,
};
