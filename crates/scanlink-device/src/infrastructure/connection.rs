//! Connection state machine for the device side of the relay.
//!
//! One [`ScannerClient`] represents one device session:
//!
//! ```text
//! Idle ──connect()──► Connecting ──open──► Connected
//!                        ▲                    │ error/close
//!                        │ timer fires        ▼
//!                        └───────────── Disconnected
//!                                             │ shutdown()
//!                        (any state) ──────► Shutdown  (terminal)
//! ```
//!
//! - The pairing credential and device identity travel as HTTP upgrade
//!   headers on `connect()`, never as a message.
//! - While connected, one session task owns the transport and runs a single
//!   `select!` loop over the heartbeat ticker, the outbound lane, and
//!   inbound frames; aborting that task is what "stop the heartbeat and
//!   close the transport" means, so cancellation is deterministic.
//! - After a transport loss exactly one reconnect attempt is scheduled after
//!   a fixed delay.  Scheduling while one is pending is a no-op, and an
//!   epoch counter discards callbacks from superseded sessions, so no two
//!   attempts are ever concurrently in flight.
//! - `send_scan` drops the event unless the state is Connected: at-most-once
//!   delivery with no buffering, since a stale replay is worse than a lost scan
//!   for live scanning.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use scanlink_core::{
    DeviceMessage, Heartbeat, ScanEvent, AUTHORIZATION_HEADER, DEVICE_ID_HEADER,
};

use crate::domain::config::DeviceConfig;

/// Errors raised while preparing a connection attempt.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid endpoint {url}: {source}")]
    InvalidEndpoint {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("credential or device identity is not a valid header value")]
    InvalidHeader,
}

/// Connection lifecycle states.  `Shutdown` is terminal: construct a fresh
/// client to resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Shutdown,
}

/// Delivered to subscribers on every transition that affects connectivity.
#[derive(Debug, Clone)]
pub struct ConnectivityChange {
    pub connected: bool,
    /// Short human-readable cause, absent on a successful open.
    pub reason: Option<String>,
}

/// The device-side connection client.
///
/// Construct one per device session and share it (`Arc`) between the decode
/// pipeline and the UI; all methods take `&self`.
pub struct ScannerClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Mutex<DeviceConfig>,
    state: Mutex<ClientState>,
    /// Outbound lane into the live session task; `None` unless Connected.
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    session: Mutex<Option<JoinHandle<()>>>,
    /// The at-most-one pending reconnect timer.
    reconnect: Mutex<Option<JoinHandle<()>>>,
    /// Bumped by `connect`/`shutdown`; a session whose epoch is stale must
    /// not report disconnects or schedule reconnects.
    epoch: AtomicU64,
    shutdown: AtomicBool,
    events: broadcast::Sender<ConnectivityChange>,
}

impl ScannerClient {
    pub fn new(config: DeviceConfig) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(ClientInner {
                config: Mutex::new(config),
                state: Mutex::new(ClientState::Idle),
                outbound: Mutex::new(None),
                session: Mutex::new(None),
                reconnect: Mutex::new(None),
                epoch: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Registers a subscriber for connectivity changes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityChange> {
        self.inner.events.subscribe()
    }

    pub async fn state(&self) -> ClientState {
        *self.inner.state.lock().await
    }

    /// Opens (or re-opens) the connection using the current configuration.
    ///
    /// Any existing transport is closed first and any pending reconnect
    /// timer is cancelled: this call *is* the attempt.  No-op after
    /// `shutdown`.
    pub async fn connect(&self) {
        ClientInner::connect(&self.inner).await;
    }

    /// Replaces the endpoint/credential/identity configuration.
    ///
    /// Deliberately does not reconnect: configuration change and connection
    /// attempt are independent operations.  Callers wanting the old
    /// change-and-reconnect behavior compose this with [`connect`].
    ///
    /// [`connect`]: Self::connect
    pub async fn update_config(&self, config: DeviceConfig) {
        *self.inner.config.lock().await = config;
    }

    /// Sends one scan event, or silently drops it when not connected.
    ///
    /// No queueing, no retry: a scan made while offline is gone.
    pub async fn send_scan(&self, event: &ScanEvent) {
        if *self.inner.state.lock().await != ClientState::Connected {
            debug!("not connected; scan {} dropped", event.barcode);
            return;
        }
        let Some(sender) = self.inner.outbound.lock().await.clone() else {
            return;
        };
        match serde_json::to_string(&DeviceMessage::Scan(event.clone())) {
            Ok(payload) => {
                // try_send: a congested lane drops the event rather than
                // queueing it.
                if sender.try_send(Message::Text(payload)).is_err() {
                    debug!("outbound lane unavailable; scan {} dropped", event.barcode);
                }
            }
            Err(e) => warn!("failed to encode scan event: {e}"),
        }
    }

    /// Terminal shutdown: cancels the reconnect timer, stops the heartbeat,
    /// closes the transport, and notifies subscribers.  Idempotent; no
    /// transition is possible afterwards.
    pub async fn shutdown(&self) {
        ClientInner::shutdown(&self.inner).await;
    }
}

impl ClientInner {
    // Returns a boxed future rather than using `async fn` so the future has a
    // concrete, explicitly-`Send` type. `connect` and `run_session` spawn each
    // other (via the reconnect timer), and with opaque `async fn` return types
    // the compiler cannot resolve the `Send` auto-trait of that cycle. Erasing
    // `connect`'s type behind `dyn Future + Send` breaks the inference cycle.
    fn connect<'a>(
        inner: &'a Arc<ClientInner>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if inner.shutdown.load(Ordering::Relaxed) {
                debug!("connect ignored after shutdown");
                return;
            }

            // This call is the reconnect attempt; a timer still pending for an
            // earlier loss is obsolete.
            if let Some(timer) = inner.reconnect.lock().await.take() {
                timer.abort();
            }

            // Hold the session slot across abort/spawn/store so concurrent
            // connect and shutdown calls serialize on it: a superseded session
            // task can never outlive its replacement unobserved.
            let mut session = inner.session.lock().await;
            if inner.shutdown.load(Ordering::Relaxed) {
                return; // shut down while we were cancelling the timer
            }
            let epoch = inner.epoch.fetch_add(1, Ordering::Relaxed) + 1;
            // Close any existing transport before opening a new one.
            if let Some(previous) = session.take() {
                previous.abort();
            }
            *inner.outbound.lock().await = None;
            *inner.state.lock().await = ClientState::Connecting;

            let task_inner = Arc::clone(inner);
            *session = Some(tokio::spawn(async move {
                ClientInner::run_session(task_inner, epoch).await;
            }));
        })
    }

    async fn run_session(inner: Arc<ClientInner>, epoch: u64) {
        let config = inner.config.lock().await.clone();

        let request = match build_request(&config) {
            Ok(request) => request,
            Err(e) => {
                Self::on_disconnect(&inner, epoch, format!("connect failed: {e}")).await;
                return;
            }
        };

        let ws = match connect_async(request).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                Self::on_disconnect(&inner, epoch, format!("connect failed: {e}")).await;
                return;
            }
        };

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(32);
        {
            // Serialize with connect/shutdown on the session slot: only the
            // current session may publish the Connected state.
            let _slot = inner.session.lock().await;
            if inner.epoch.load(Ordering::Relaxed) != epoch
                || inner.shutdown.load(Ordering::Relaxed)
            {
                // Superseded while the handshake was in flight; drop the socket.
                return;
            }
            *inner.outbound.lock().await = Some(outbound_tx);
            *inner.state.lock().await = ClientState::Connected;
        }
        info!("connected to {}", config.ws_url());
        Self::notify(&inner, true, None);

        let (mut sink, mut stream) = ws.split();
        let mut heartbeat = interval(config.heartbeat_interval);
        heartbeat.tick().await; // the interval's immediate first tick

        let reason = loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let ping = DeviceMessage::Ping(Heartbeat::now(config.device_id.as_str()));
                    match serde_json::to_string(&ping) {
                        Ok(payload) => {
                            if let Err(e) = sink.send(Message::Text(payload)).await {
                                break format!("heartbeat failed: {e}");
                            }
                        }
                        Err(e) => warn!("failed to encode heartbeat: {e}"),
                    }
                }
                outgoing = outbound_rx.recv() => match outgoing {
                    Some(message) => {
                        if let Err(e) = sink.send(message).await {
                            break format!("send failed: {e}");
                        }
                    }
                    // The outbound lane was dropped: this session is over.
                    None => break "connection superseded".to_string(),
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Close(Some(close)))) => {
                        break format!("closed by host: {} ({})", close.reason, u16::from(close.code));
                    }
                    Some(Ok(Message::Close(None))) => break "closed by host".to_string(),
                    Some(Ok(_)) => {
                        // The host pushes nothing the device acts on today.
                    }
                    Some(Err(e)) => break format!("transport error: {e}"),
                    None => break "connection lost".to_string(),
                }
            }
        };

        *inner.outbound.lock().await = None;
        Self::on_disconnect(&inner, epoch, reason).await;
    }

    /// Transport lost (or never established) for the session at `epoch`.
    async fn on_disconnect(inner: &Arc<ClientInner>, epoch: u64, reason: String) {
        if inner.epoch.load(Ordering::Relaxed) != epoch {
            return; // superseded by a newer connect or by shutdown
        }
        if inner.shutdown.load(Ordering::Relaxed) {
            return; // shutdown already notified subscribers
        }
        *inner.state.lock().await = ClientState::Disconnected;
        warn!("disconnected: {reason}");
        Self::notify(inner, false, Some(reason));
        Self::schedule_reconnect(inner).await;
    }

    /// Arms the single reconnect timer; a no-op while one is already pending.
    async fn schedule_reconnect(inner: &Arc<ClientInner>) {
        if inner.shutdown.load(Ordering::Relaxed) {
            return;
        }
        let mut pending = inner.reconnect.lock().await;
        if inner.shutdown.load(Ordering::Relaxed) {
            return;
        }
        if pending.as_ref().is_some_and(|timer| !timer.is_finished()) {
            return;
        }
        let delay = inner.config.lock().await.reconnect_delay;
        let timer_inner = Arc::clone(inner);
        *pending = Some(tokio::spawn(async move {
            sleep(delay).await;
            // Clear our own slot before reconnecting so connect() does not
            // abort the very task performing the attempt.
            *timer_inner.reconnect.lock().await = None;
            if !timer_inner.shutdown.load(Ordering::Relaxed) {
                debug!("reconnect timer fired");
                ClientInner::connect(&timer_inner).await;
            }
        }));
    }

    async fn shutdown(inner: &Arc<ClientInner>) {
        if inner.shutdown.swap(true, Ordering::Relaxed) {
            return; // already shut down
        }
        inner.epoch.fetch_add(1, Ordering::Relaxed);
        if let Some(timer) = inner.reconnect.lock().await.take() {
            timer.abort();
        }
        // Aborting the session task stops the heartbeat and drops the
        // transport in one step.
        if let Some(session) = inner.session.lock().await.take() {
            session.abort();
        }
        *inner.outbound.lock().await = None;
        *inner.state.lock().await = ClientState::Shutdown;
        info!("client shut down");
        Self::notify(inner, false, Some("shutdown requested".to_string()));
    }

    fn notify(inner: &Arc<ClientInner>, connected: bool, reason: Option<String>) {
        let _ = inner.events.send(ConnectivityChange { connected, reason });
    }
}

/// Builds the upgrade request carrying the pairing headers.
fn build_request(config: &DeviceConfig) -> Result<Request, ClientError> {
    let url = config.ws_url();
    let mut request = url
        .clone()
        .into_client_request()
        .map_err(|source| ClientError::InvalidEndpoint { url, source })?;
    let credential =
        HeaderValue::from_str(&config.credential).map_err(|_| ClientError::InvalidHeader)?;
    let device_id =
        HeaderValue::from_str(&config.device_id).map_err(|_| ClientError::InvalidHeader)?;
    let headers = request.headers_mut();
    headers.insert(AUTHORIZATION_HEADER, credential);
    headers.insert(DEVICE_ID_HEADER, device_id);
    Ok(request)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
