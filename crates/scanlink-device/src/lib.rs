//! scanlink-device library entry point.
//!
//! The handheld side of the scanner relay: a connection client that pairs
//! with a configured host, keeps the link alive with heartbeats, recovers
//! from transient network failure with a fixed-delay reconnect, and forwards
//! decoded barcodes as scan events.
//!
//! The camera/decoder pipeline is an external collaborator: it hands this
//! crate one `(barcode, format)` pair per decode via
//! [`application::scan_capture::ScanForwarder`].

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::scan_capture::{ScanDebouncer, ScanForwarder, DEFAULT_SCAN_GAP};
pub use domain::config::{
    DeviceConfig, DEFAULT_CREDENTIAL, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RECONNECT_DELAY,
    DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT,
};
pub use infrastructure::connection::{ClientState, ConnectivityChange, ScannerClient};
