//! Integration tests for the relay gateway.
//!
//! Two layers are exercised here:
//!
//! - **Session tests** drive [`scanlink_host::infrastructure::ws_server::run_session`]
//!   over an in-memory duplex pipe (`tokio::io::duplex`), so the message pump,
//!   close codes, sink forwarding, and registry bookkeeping are tested without
//!   a real socket or the origin filter in the way.
//! - **Listener tests** run a real `RelayGateway` on an ephemeral loopback
//!   port.  Loopback is deliberately *not* in the accepted private-prefix set,
//!   which makes the rejection paths (4001 before 4003, 4003 for loopback)
//!   observable end-to-end with real WebSocket upgrades.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use scanlink_core::ScanEvent;
use scanlink_host::infrastructure::ws_server::run_session;
use scanlink_host::{DeviceRegistry, GatewayEvent, RelayGateway, ScanSink, SessionContext};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Test fixtures ─────────────────────────────────────────────────────────────

/// Sink that accepts everything; listener tests never reach a delivery.
struct NullSink;

#[async_trait::async_trait]
impl ScanSink for NullSink {
    async fn deliver(&self, _barcode: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

struct SessionHarness {
    registry: Arc<Mutex<DeviceRegistry>>,
    scans_rx: mpsc::Receiver<ScanEvent>,
    _events_rx: mpsc::Receiver<GatewayEvent>,
    shutdown_tx: watch::Sender<bool>,
    client: WebSocketStream<DuplexStream>,
    session: tokio::task::JoinHandle<()>,
}

/// Spawns `run_session` for a pre-validated connection over a duplex pipe and
/// returns the client end plus every observable output.
async fn spawn_session(device_id: &str) -> SessionHarness {
    let registry = Arc::new(Mutex::new(DeviceRegistry::new()));
    let (events_tx, events_rx) = mpsc::channel(64);
    let (scans_tx, scans_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctx = SessionContext {
        credential: Arc::from("PAIR1"),
        registry: Arc::clone(&registry),
        events: events_tx,
        scans: scans_tx,
    };

    let (server_io, client_io) = tokio::io::duplex(4096);
    let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client_ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

    let device_id = device_id.to_string();
    let session = tokio::spawn(run_session(
        server_ws,
        0,
        device_id,
        "192.168.0.77".to_string(),
        ctx,
        shutdown_rx,
    ));

    SessionHarness {
        registry,
        scans_rx,
        _events_rx: events_rx,
        shutdown_tx,
        client: client_ws,
        session,
    }
}

async fn expect_close_code(ws: &mut WebSocketStream<DuplexStream>, expected: u16) {
    loop {
        let frame = timeout(TEST_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close frame")
            .expect("stream ended without a close frame")
            .expect("transport error while waiting for close frame");
        match frame {
            Message::Close(Some(close)) => {
                assert_eq!(close.code, CloseCode::from(expected));
                return;
            }
            Message::Close(None) => panic!("close frame carried no status code"),
            _ => continue,
        }
    }
}

// ── Session tests (duplex) ────────────────────────────────────────────────────

/// The happy-path scenario: one well-formed SCAN produces exactly one
/// sink delivery with the same barcode, and the registry shows the device
/// while the connection is open.
#[tokio::test]
async fn test_scan_message_is_forwarded_to_sink_exactly_once() {
    let mut harness = spawn_session("DEV-1").await;

    assert_eq!(harness.registry.lock().await.len(), 1);
    let snapshot = harness.registry.lock().await.snapshot();
    assert_eq!(snapshot[0].device_id, "DEV-1");

    let scan = r#"{"type":"SCAN","deviceId":"DEV-1","barcode":"0123456789","format":"EAN13","timestamp":"2024-01-01T00:00:00Z"}"#;
    harness.client.send(Message::Text(scan.to_string())).await.unwrap();

    let delivered = timeout(TEST_TIMEOUT, harness.scans_rx.recv())
        .await
        .expect("timed out waiting for sink delivery")
        .expect("scan channel closed unexpectedly");
    assert_eq!(delivered.barcode, "0123456789");
    assert_eq!(delivered.device_id, "DEV-1");

    // Close and let the session wind down: nothing else may reach the sink
    // and the record must leave the registry.
    harness.client.close(None).await.unwrap();
    drop(harness.client);
    timeout(TEST_TIMEOUT, harness.session).await.unwrap().unwrap();

    assert!(harness.scans_rx.try_recv().is_err(), "exactly one delivery expected");
    assert!(harness.registry.lock().await.is_empty());
}

#[tokio::test]
async fn test_non_json_payload_closes_with_4002_and_no_delivery() {
    let mut harness = spawn_session("DEV-1").await;

    harness
        .client
        .send(Message::Text("this is not json".to_string()))
        .await
        .unwrap();

    expect_close_code(&mut harness.client, 4002).await;
    drop(harness.client);
    timeout(TEST_TIMEOUT, harness.session).await.unwrap().unwrap();

    assert!(harness.scans_rx.try_recv().is_err(), "sink must never be invoked");
    assert!(
        harness.registry.lock().await.is_empty(),
        "record must be removed via the normal close path"
    );
}

#[tokio::test]
async fn test_heartbeat_is_accepted_but_not_forwarded() {
    let mut harness = spawn_session("DEV-1").await;

    let ping = r#"{"type":"PING","deviceId":"DEV-1","ts":"2024-01-01T00:00:05Z"}"#;
    harness.client.send(Message::Text(ping.to_string())).await.unwrap();

    // A scan sent afterwards still goes through: the heartbeat neither closed
    // the connection nor reached the sink.
    let scan = r#"{"type":"SCAN","deviceId":"DEV-1","barcode":"777","format":"QR","timestamp":"2024-01-01T00:00:06Z"}"#;
    harness.client.send(Message::Text(scan.to_string())).await.unwrap();

    let delivered = timeout(TEST_TIMEOUT, harness.scans_rx.recv())
        .await
        .expect("timed out waiting for sink delivery")
        .expect("scan channel closed unexpectedly");
    assert_eq!(delivered.barcode, "777");
}

#[tokio::test]
async fn test_unknown_message_kind_is_ignored() {
    let mut harness = spawn_session("DEV-1").await;

    let unknown = r#"{"type":"BATTERY","deviceId":"DEV-1","level":17}"#;
    harness.client.send(Message::Text(unknown.to_string())).await.unwrap();

    let scan = r#"{"type":"SCAN","deviceId":"DEV-1","barcode":"42","format":"CODE128","timestamp":"2024-01-01T00:00:07Z"}"#;
    harness.client.send(Message::Text(scan.to_string())).await.unwrap();

    let delivered = timeout(TEST_TIMEOUT, harness.scans_rx.recv())
        .await
        .expect("timed out waiting for sink delivery")
        .expect("scan channel closed unexpectedly");
    assert_eq!(delivered.barcode, "42");
    assert_eq!(harness.registry.lock().await.len(), 1, "connection must stay open");
}

#[tokio::test]
async fn test_shutdown_signal_closes_session_and_unregisters() {
    let mut harness = spawn_session("DEV-1").await;
    assert_eq!(harness.registry.lock().await.len(), 1);

    harness.shutdown_tx.send(true).unwrap();

    // The session closes its side; the client observes the close frame.
    loop {
        match timeout(TEST_TIMEOUT, harness.client.next())
            .await
            .expect("timed out waiting for shutdown close")
        {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
    drop(harness.client);
    timeout(TEST_TIMEOUT, harness.session).await.unwrap().unwrap();

    assert!(harness.registry.lock().await.is_empty());
}

/// Two simultaneous connections presenting the same identity both register:
/// the registry keys by connection, not by device identity.
#[tokio::test]
async fn test_two_sessions_with_same_identity_register_independently() {
    let registry = Arc::new(Mutex::new(DeviceRegistry::new()));
    let (events_tx, _events_rx) = mpsc::channel(64);
    let (scans_tx, _scans_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctx = SessionContext {
        credential: Arc::from("PAIR1"),
        registry: Arc::clone(&registry),
        events: events_tx,
        scans: scans_tx,
    };

    let mut clients = Vec::new();
    let mut sessions = Vec::new();
    for conn_id in 0..2u64 {
        let (server_io, client_io) = tokio::io::duplex(4096);
        let server_ws = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client_ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        clients.push(client_ws);
        sessions.push(tokio::spawn(run_session(
            server_ws,
            conn_id,
            "DEV-1".to_string(),
            format!("192.168.0.{}", 10 + conn_id),
            ctx.clone(),
            shutdown_rx.clone(),
        )));
    }

    // Give both sessions a moment to register, then check the shared set.
    tokio::time::sleep(Duration::from_millis(50)).await;
    {
        let registry = registry.lock().await;
        assert_eq!(registry.len(), 2, "duplicate identities must not be deduplicated");
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].device_id, "DEV-1");
        assert_eq!(snapshot[1].device_id, "DEV-1");
    }

    shutdown_tx.send(true).unwrap();
    drop(clients);
    for session in sessions {
        timeout(TEST_TIMEOUT, session).await.unwrap().unwrap();
    }
    assert!(registry.lock().await.is_empty());
}

// ── Listener tests (real sockets, loopback) ───────────────────────────────────

async fn start_gateway(credential: &str) -> (RelayGateway, mpsc::Receiver<GatewayEvent>, std::net::SocketAddr) {
    let (mut gateway, events) = RelayGateway::new(Arc::new(NullSink));
    gateway.start(0, credential).await.expect("bind on ephemeral port");
    let addr = gateway.local_addr().expect("listener must report its address");
    (gateway, events, addr)
}

fn client_request(addr: std::net::SocketAddr, credential: Option<&str>, device_id: Option<&str>) -> tokio_tungstenite::tungstenite::handshake::client::Request {
    let mut request = format!("ws://{addr}").into_client_request().unwrap();
    if let Some(credential) = credential {
        request
            .headers_mut()
            .insert("Authorization", HeaderValue::from_str(credential).unwrap());
    }
    if let Some(device_id) = device_id {
        request
            .headers_mut()
            .insert("X-Device-Id", HeaderValue::from_str(device_id).unwrap());
    }
    request
}

/// Loopback is outside the accepted private prefixes, so even a correct
/// credential is rejected with 4003: the documented origin-filter gap.
#[tokio::test]
async fn test_loopback_connection_with_valid_credential_closes_4003() {
    let (gateway, _events, addr) = start_gateway("PAIR1").await;

    let (mut ws, _resp) =
        tokio_tungstenite::connect_async(client_request(addr, Some("PAIR1"), Some("DEV-1")))
            .await
            .expect("upgrade itself must succeed");

    let frame = timeout(TEST_TIMEOUT, ws.next())
        .await
        .expect("timed out waiting for rejection")
        .expect("stream ended without a close frame")
        .expect("transport error");
    match frame {
        Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::from(4003)),
        other => panic!("expected close frame, got {other:?}"),
    }

    assert!(gateway.snapshot().await.is_empty(), "rejected peers are never registered");
}

/// The credential check runs before the origin check: a wrong credential from
/// loopback yields 4001, not 4003.
#[tokio::test]
async fn test_wrong_credential_closes_4001_before_origin_check() {
    let (gateway, _events, addr) = start_gateway("PAIR1").await;

    let (mut ws, _resp) =
        tokio_tungstenite::connect_async(client_request(addr, Some("WRONG"), Some("DEV-1")))
            .await
            .expect("upgrade itself must succeed");

    let frame = timeout(TEST_TIMEOUT, ws.next())
        .await
        .expect("timed out waiting for rejection")
        .expect("stream ended without a close frame")
        .expect("transport error");
    match frame {
        Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::from(4001)),
        other => panic!("expected close frame, got {other:?}"),
    }

    assert!(gateway.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_missing_credential_header_closes_4001() {
    let (_gateway, _events, addr) = start_gateway("PAIR1").await;

    let (mut ws, _resp) = tokio_tungstenite::connect_async(client_request(addr, None, None))
        .await
        .expect("upgrade itself must succeed");

    let frame = timeout(TEST_TIMEOUT, ws.next())
        .await
        .expect("timed out waiting for rejection")
        .expect("stream ended without a close frame")
        .expect("transport error");
    match frame {
        Message::Close(Some(close)) => assert_eq!(close.code, CloseCode::from(4001)),
        other => panic!("expected close frame, got {other:?}"),
    }
}

/// Reconfiguration is stop-then-start: after a second `start` with a rotated
/// credential, every connection is validated against the new value: the old
/// credential earns 4001, the new one passes the credential stage (and is
/// then rejected by the loopback origin filter with 4003).
#[tokio::test]
async fn test_restart_applies_the_new_credential_atomically() {
    let (mut gateway, _events, _first_addr) = start_gateway("PAIR1").await;

    gateway.start(0, "ROTATED").await.expect("restart must succeed");
    let addr = gateway.local_addr().unwrap();

    let (mut old_cred, _resp) =
        tokio_tungstenite::connect_async(client_request(addr, Some("PAIR1"), None))
            .await
            .expect("upgrade itself must succeed");
    let frame = timeout(TEST_TIMEOUT, old_cred.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("transport error");
    match frame {
        Message::Close(Some(close)) => assert_eq!(
            close.code,
            CloseCode::from(4001),
            "the retired credential must no longer pass"
        ),
        other => panic!("expected close frame, got {other:?}"),
    }

    let (mut new_cred, _resp) =
        tokio_tungstenite::connect_async(client_request(addr, Some("ROTATED"), None))
            .await
            .expect("upgrade itself must succeed");
    let frame = timeout(TEST_TIMEOUT, new_cred.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("transport error");
    match frame {
        Message::Close(Some(close)) => assert_eq!(
            close.code,
            CloseCode::from(4003),
            "the rotated credential passes and loopback origin is what rejects"
        ),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stop_is_idempotent_and_reports_empty_client_set() {
    let (mut gateway, mut events, addr) = start_gateway("PAIR1").await;

    gateway.stop().await;
    gateway.stop().await;

    assert!(gateway.local_addr().is_none());
    let refused = tokio_tungstenite::connect_async(client_request(addr, Some("PAIR1"), None)).await;
    assert!(refused.is_err(), "stopped listener must not accept connections");

    // Drain events: at least one ClientsChanged([]) must have been emitted.
    let mut saw_empty_set = false;
    while let Ok(event) = events.try_recv() {
        if let GatewayEvent::ClientsChanged(clients) = event {
            if clients.is_empty() {
                saw_empty_set = true;
            }
        }
    }
    assert!(saw_empty_set, "stop must notify observers of the empty client set");
}
