//! scanlink-host library entry point.
//!
//! The host side of the scanner relay: it owns the listening endpoint,
//! authenticates devices, keeps the live device registry, and forwards
//! validated scan events to the output sink.
//!
//! ```text
//! device ──(WebSocket + pairing headers)──► RelayGateway
//!                                              │ validate (4001/4003)
//!                                              │ register
//!                                              ├─► DeviceRegistry
//!                                              ├─► sink worker ──► ScanSink
//!                                              └─► GatewayEvent observers
//! ```
//!
//! Re-exports the public modules so integration tests in `tests/` and the
//! binary in `main.rs` share the same module tree.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::sink::{spawn_sink_worker, ScanSink, StdoutSink};
pub use domain::config::{HostConfig, PairingInfo, DEFAULT_CREDENTIAL, DEFAULT_PORT};
pub use domain::registry::{ConnectionId, ConnectionIdAllocator, ConnectionRecord, DeviceRegistry};
pub use infrastructure::ws_server::{GatewayError, GatewayEvent, RelayGateway, SessionContext};
