//! Wire protocol for the device ↔ host link.
//!
//! The transport is a WebSocket connection opened by the device.  Pairing
//! metadata (credential and device identity) travels as HTTP upgrade headers,
//! never as a message body; application messages are UTF-8 JSON text frames,
//! one object per frame.

pub mod handshake;
pub mod messages;
