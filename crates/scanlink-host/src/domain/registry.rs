//! Live device registry: the host's in-memory map of authenticated
//! connections.
//!
//! A record exists here if and only if its underlying transport connection is
//! open *and* passed handshake validation; there are no pending or stale
//! entries.  Records are keyed by an opaque per-connection id, not by device
//! identity: two simultaneous connections presenting the same identity
//! produce two independent records.
//!
//! The registry is shared between connection tasks behind a
//! `tokio::sync::Mutex`; each register/unregister/snapshot holds the lock for
//! the whole operation, so the live set is always exactly consistent.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use scanlink_core::iso_timestamp_now;

/// Opaque handle identifying one transport connection.
pub type ConnectionId = u64;

/// Thread-safe allocator of [`ConnectionId`]s.
///
/// Ids start at 0 and increase by 1 per allocation; allocation is lock-free
/// so a connection task can take its id before touching the registry lock.
pub struct ConnectionIdAllocator {
    inner: AtomicU64,
}

impl ConnectionIdAllocator {
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(0),
        }
    }

    /// Returns the next id.  Relaxed ordering suffices: ids only need to be
    /// unique, not synchronized with other memory.
    pub fn next(&self) -> ConnectionId {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for ConnectionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Metadata for one live, authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Identity presented by the device at handshake time (opaque, may
    /// collide across connections).
    pub device_id: String,
    /// Peer network address as observed by the listener.
    pub peer_addr: String,
    /// ISO-8601 timestamp of registration.
    pub connected_at: String,
}

/// In-memory registry of live connections, in insertion order.
#[derive(Default)]
pub struct DeviceRegistry {
    entries: Vec<(ConnectionId, ConnectionRecord)>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record for a connection that passed handshake validation.
    ///
    /// Duplicate device identities are permitted and produce independent
    /// records; the caller guarantees `id` is fresh.
    pub fn register(
        &mut self,
        id: ConnectionId,
        device_id: String,
        peer_addr: String,
    ) -> ConnectionRecord {
        let record = ConnectionRecord {
            device_id,
            peer_addr,
            connected_at: iso_timestamp_now(),
        };
        self.entries.push((id, record.clone()));
        record
    }

    /// Removes the record for `id`.  No-op when absent, so the normal close
    /// path can run unconditionally.
    pub fn unregister(&mut self, id: ConnectionId) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }

    /// Returns the current live set in insertion order.
    ///
    /// Used for observation only (the client list in a UI); never for
    /// protocol decisions.
    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        self.entries.iter().map(|(_, record)| record.clone()).collect()
    }

    /// Removes every record.  Used by the gateway's `stop`.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
