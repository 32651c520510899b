//! Relay gateway: WebSocket accept loop, handshake validation, and the
//! per-connection message pump.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured port (all interfaces).
//! 2. Upgrading each incoming connection to a WebSocket session, capturing
//!    the pairing headers from the upgrade request.
//! 3. Validating credential and peer origin *before* registering: a
//!    connection that fails validation is closed with its distinct code
//!    (4001 / 4003) and never appears in the registry.
//! 4. Parsing inbound JSON frames and forwarding scan events to the sink
//!    worker.
//! 5. Emitting [`GatewayEvent`]s (log lines and client-list changes) to the
//!    embedding application on every lifecycle transition.
//!
//! Each accepted connection runs in its own Tokio task; the registry is the
//! only state they share.  Reconfiguration is stop-then-start: `start` tears
//! down any live listener first, so no two listeners are ever bound at once
//! and no connection is ever validated against a half-updated credential.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};

use scanlink_core::{
    close_code, parse_device_message, validate_handshake, DeviceMessage, ScanEvent,
    AUTHORIZATION_HEADER, DEVICE_ID_HEADER, UNKNOWN_DEVICE_ID,
};

use crate::application::sink::{spawn_sink_worker, ScanSink};
use crate::domain::registry::{ConnectionId, ConnectionIdAllocator, ConnectionRecord, DeviceRegistry};

// ── Public types ──────────────────────────────────────────────────────────────

/// Errors surfaced by gateway lifecycle operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Notifications emitted to the embedding application.
///
/// `Log` carries one human-readable line per accept, reject, forward, and
/// disconnect; `ClientsChanged` carries the full registry snapshot whenever
/// the live set changes.  The gateway itself has no presentation concerns.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Log(String),
    ClientsChanged(Vec<ConnectionRecord>),
}

/// Everything a connection task needs, cloned per session.
#[derive(Clone)]
pub struct SessionContext {
    /// The credential connections are validated against.  Fixed for the
    /// lifetime of one listener; changing it means a new `start`.
    pub credential: Arc<str>,
    pub registry: Arc<Mutex<DeviceRegistry>>,
    pub events: mpsc::Sender<GatewayEvent>,
    /// Inbound side of the sink worker's queue.
    pub scans: mpsc::Sender<ScanEvent>,
}

struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// The host-side relay endpoint.
///
/// Construct exactly one per process and hand it to the lifecycle controller
/// that owns start/stop; observers consume the returned event receiver.
pub struct RelayGateway {
    registry: Arc<Mutex<DeviceRegistry>>,
    ids: Arc<ConnectionIdAllocator>,
    events: mpsc::Sender<GatewayEvent>,
    scans: mpsc::Sender<ScanEvent>,
    listener: Option<ListenerHandle>,
}

impl RelayGateway {
    /// Creates a gateway delivering scans to `sink`, and returns it together
    /// with the lifecycle event receiver.
    ///
    /// Also spawns the single sink worker; all deliveries are serialized
    /// through it so a stateful sink never sees interleaved writes.
    pub fn new(sink: Arc<dyn ScanSink>) -> (Self, mpsc::Receiver<GatewayEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (scans_tx, scans_rx) = mpsc::channel(256);
        spawn_sink_worker(sink, scans_rx);

        let gateway = Self {
            registry: Arc::new(Mutex::new(DeviceRegistry::new())),
            ids: Arc::new(ConnectionIdAllocator::new()),
            events: events_tx,
            scans: scans_tx,
            listener: None,
        };
        (gateway, events_rx)
    }

    /// Binds a listener on `0.0.0.0:port` validating against `credential`.
    ///
    /// Any previously running listener is fully torn down first, so
    /// reconfiguration can never serve a connection against a half-updated
    /// credential.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::BindFailed`] when the port cannot be bound;
    /// the gateway is left stopped in that case.
    pub async fn start(&mut self, port: u16, credential: &str) -> Result<(), GatewayError> {
        self.stop().await;

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::BindFailed { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| GatewayError::BindFailed { addr, source })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = SessionContext {
            credential: Arc::from(credential),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
            scans: self.scans.clone(),
        };
        let ids = Arc::clone(&self.ids);
        let task = tokio::spawn(accept_loop(listener, ids, ctx, shutdown_rx));

        self.listener = Some(ListenerHandle {
            shutdown: shutdown_tx,
            task,
            local_addr,
        });

        info!("relay listening on {local_addr}");
        let _ = self
            .events
            .send(GatewayEvent::Log(format!("listening on port {}", local_addr.port())))
            .await;
        Ok(())
    }

    /// Stops the listener, closes every live connection, clears the registry,
    /// and notifies observers that the client set is now empty.  Idempotent.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.listener.take() {
            // Sessions and the accept loop all watch this channel.
            let _ = handle.shutdown.send(true);
            if let Err(e) = handle.task.await {
                error!("accept loop ended abnormally: {e}");
            }
            let _ = self
                .events
                .send(GatewayEvent::Log("listener stopped".to_string()))
                .await;
        }
        self.registry.lock().await.clear();
        let _ = self.events.send(GatewayEvent::ClientsChanged(Vec::new())).await;
    }

    /// Current registry snapshot, insertion-ordered.
    pub async fn snapshot(&self) -> Vec<ConnectionRecord> {
        self.registry.lock().await.snapshot()
    }

    /// The address the live listener is bound to, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|handle| handle.local_addr)
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    listener: TcpListener,
    ids: Arc<ConnectionIdAllocator>,
    ctx: SessionContext,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("accept loop stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("incoming connection from {peer}");
                    let ids = Arc::clone(&ids);
                    let ctx = ctx.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, ids, ctx, shutdown).await;
                    });
                }
                Err(e) => {
                    // Transient accept failures (fd exhaustion etc.) must not
                    // bring the listener down; its only shutdown path is stop().
                    error!("accept error: {e}");
                }
            }
        }
    }
}

// ── Per-connection handling ───────────────────────────────────────────────────

/// Upgrades one TCP connection, validates the pairing headers, and either
/// rejects with a distinct close code or hands off to [`run_session`].
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ids: Arc<ConnectionIdAllocator>,
    ctx: SessionContext,
    shutdown: watch::Receiver<bool>,
) {
    let mut credential: Option<String> = None;
    let mut device_id: Option<String> = None;

    // The pairing metadata travels as upgrade headers, not as a first
    // message; capture it during the HTTP handshake.
    let callback = |req: &Request, resp: Response| {
        credential = header_value(req, AUTHORIZATION_HEADER);
        device_id = header_value(req, DEVICE_ID_HEADER);
        Ok(resp)
    };

    let mut ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake with {peer} failed: {e}");
            return;
        }
    };

    let peer_ip = peer.ip().to_string();
    if let Err(rejection) = validate_handshake(credential.as_deref(), &ctx.credential, &peer_ip) {
        let _ = ctx
            .events
            .send(GatewayEvent::Log(format!("rejected {peer_ip}: {rejection}")))
            .await;
        send_close(&mut ws, rejection.close_code(), &rejection.to_string()).await;
        return;
    }

    let device_id = device_id.unwrap_or_else(|| UNKNOWN_DEVICE_ID.to_string());
    let conn_id = ids.next();
    run_session(ws, conn_id, device_id, peer_ip, ctx, shutdown).await;
}

/// Runs the message pump for one validated connection.
///
/// Registers the connection on entry and unregisters it on every exit path;
/// the registry invariant (record exists iff the transport is open and
/// authenticated) holds no matter how the session ends.
///
/// Generic over the underlying stream so tests can drive a session over an
/// in-memory duplex pipe instead of a TCP socket.
pub async fn run_session<S>(
    mut ws: WebSocketStream<S>,
    conn_id: ConnectionId,
    device_id: String,
    peer_addr: String,
    ctx: SessionContext,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    {
        let mut registry = ctx.registry.lock().await;
        registry.register(conn_id, device_id.clone(), peer_addr.clone());
        let snapshot = registry.snapshot();
        drop(registry);
        let _ = ctx
            .events
            .send(GatewayEvent::Log(format!("connected: {device_id} ({peer_addr})")))
            .await;
        let _ = ctx.events.send(GatewayEvent::ClientsChanged(snapshot)).await;
    }

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // stop() was called (or the gateway was dropped): close our
                // side and wind down through the normal close path.
                if changed.is_err() || *shutdown.borrow() {
                    let _ = ws.close(None).await;
                    break;
                }
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(raw))) => match parse_device_message(&raw) {
                    Ok(Some(DeviceMessage::Scan(event))) => {
                        if event.barcode.is_empty() {
                            warn!("discarding empty barcode from {device_id}");
                            continue;
                        }
                        let _ = ctx
                            .events
                            .send(GatewayEvent::Log(format!(
                                "[{}] {} ({}) {}",
                                event.device_id, event.barcode, event.format, event.timestamp
                            )))
                            .await;
                        if ctx.scans.send(event).await.is_err() {
                            warn!("sink worker gone; scan dropped");
                        }
                    }
                    Ok(Some(DeviceMessage::Ping(heartbeat))) => {
                        // Liveness only; never forwarded.
                        debug!("heartbeat from {} at {}", heartbeat.device_id, heartbeat.ts);
                    }
                    Ok(None) => {
                        // Unknown kind: ignored for forward compatibility.
                    }
                    Err(e) => {
                        let _ = ctx
                            .events
                            .send(GatewayEvent::Log(format!(
                                "malformed message from {device_id}: {e}"
                            )))
                            .await;
                        send_close(&mut ws, close_code::MALFORMED_MESSAGE, "malformed message body")
                            .await;
                        break;
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    // The protocol is JSON text frames only.
                    warn!("unexpected binary frame from {device_id} (ignored)");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!("{device_id} closed the connection");
                    break;
                }
                Some(Err(e)) => {
                    debug!("transport error on {device_id}: {e}");
                    break;
                }
            }
        }
    }

    {
        let mut registry = ctx.registry.lock().await;
        registry.unregister(conn_id);
        let snapshot = registry.snapshot();
        drop(registry);
        let _ = ctx
            .events
            .send(GatewayEvent::Log(format!("disconnected: {device_id}")))
            .await;
        let _ = ctx.events.send(GatewayEvent::ClientsChanged(snapshot)).await;
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn header_value(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

async fn send_close<S>(ws: &mut WebSocketStream<S>, code: u16, reason: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_owned().into(),
    };
    if let Err(e) = ws.close(Some(frame)).await {
        debug!("close handshake failed: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
