//! End-to-end session behavior against scripted transports: fragmented
//! free-text ingestion, tool-call acknowledgement, reconnect-after-close,
//! intentional stop, and debounced evidence replay.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use vigil_core::{
    Alert, AlertStatus, ChannelMode, ClientConfig, ConnectionEvent, ConnectionState, Connector,
    Transport, TransportEvent, VigilClient, VigilError, WireFrame,
};

const STROKE: &str =
    r#"{"status":"CRITICAL","diagnosis":"Stroke","confidence":0.9,"symptoms":["droop"]}"#;
const NORMAL: &str =
    r#"{"status":"NORMAL","diagnosis":"Normal","confidence":0.99,"symptoms":[]}"#;

/// Test-side handles of one scripted transport.
struct TestLink {
    inbound: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<WireFrame>,
}

/// Hands out pre-built transports, one per connect attempt, in order.
struct ScriptedConnector {
    transports: Mutex<VecDeque<Transport>>,
    attempts: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    fn with_links(count: usize) -> (Self, Vec<TestLink>, Arc<AtomicUsize>) {
        let mut transports = VecDeque::new();
        let mut links = Vec::new();
        for _ in 0..count {
            let (out_tx, out_rx) = mpsc::channel(64);
            let (in_tx, in_rx) = mpsc::channel(64);
            transports.push_back(Transport::new(out_tx, in_rx, Vec::new()));
            links.push(TestLink {
                inbound: in_tx,
                outbound: out_rx,
            });
        }
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            Self {
                transports: Mutex::new(transports),
                attempts: Arc::clone(&attempts),
            },
            links,
            attempts,
        )
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _config: &ClientConfig) -> vigil_core::error::Result<Transport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.transports
            .lock()
            .pop_front()
            .ok_or_else(|| VigilError::Connect("no scripted transport left".into()))
    }
}

fn config(mode: ChannelMode) -> ClientConfig {
    ClientConfig {
        mode,
        ..ClientConfig::default()
    }
}

async fn wait_for_state(
    rx: &mut broadcast::Receiver<ConnectionEvent>,
    want: ConnectionState,
) -> ConnectionEvent {
    timeout(Duration::from_secs(60), async {
        loop {
            let event = rx.recv().await.expect("connection channel closed");
            if event.state == want {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want:?}"))
}

async fn recv_alert(rx: &mut broadcast::Receiver<Alert>) -> Alert {
    timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("timed out waiting for alert")
        .expect("alert channel closed")
}

#[tokio::test(start_paused = true)]
async fn fragmented_text_yields_alerts_in_arrival_order() {
    let (connector, mut links, _) = ScriptedConnector::with_links(1);
    let client = VigilClient::with_connector(config(ChannelMode::FreeText), Arc::new(connector));
    let mut alerts = client.subscribe_alerts();
    let mut conn = client.subscribe_connection();

    client.start(None).await.unwrap();
    wait_for_state(&mut conn, ConnectionState::Connected).await;

    let link = links.remove(0);
    // First object split mid-string; second object in its own frame.
    let split = STROKE.len() / 3;
    link.inbound
        .send(TransportEvent::Text(STROKE[..split].into()))
        .await
        .unwrap();
    link.inbound
        .send(TransportEvent::Text(STROKE[split..].into()))
        .await
        .unwrap();
    link.inbound
        .send(TransportEvent::Text(NORMAL.into()))
        .await
        .unwrap();

    let first = recv_alert(&mut alerts).await;
    assert_eq!(first.status, AlertStatus::Critical);
    assert_eq!(first.diagnosis, "Stroke");
    assert!((first.confidence - 0.9).abs() < 1e-9);
    assert_eq!(first.symptoms, vec!["droop".to_string()]);

    let second = recv_alert(&mut alerts).await;
    assert_eq!(second.status, AlertStatus::Normal);
    assert_eq!(second.diagnosis, "Normal");

    let snapshot = client.diagnostics_snapshot();
    assert_eq!(snapshot.alerts_emitted, 2);
    assert_eq!(snapshot.parse_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn tool_invocation_emits_alert_and_is_acknowledged() {
    let (connector, mut links, _) = ScriptedConnector::with_links(1);
    let client = VigilClient::with_connector(config(ChannelMode::ToolCall), Arc::new(connector));
    let mut alerts = client.subscribe_alerts();
    let mut conn = client.subscribe_connection();

    client.start(None).await.unwrap();
    wait_for_state(&mut conn, ConnectionState::Connected).await;

    let mut link = links.remove(0);
    let invocation = r#"{"id":"call-9","name":"report_medical_status","args":{"status":"WARNING","diagnosis":"Shock","confidence":0.6,"symptoms":["pallor"]}}"#;
    link.inbound
        .send(TransportEvent::Text(invocation.into()))
        .await
        .unwrap();

    let alert = recv_alert(&mut alerts).await;
    assert_eq!(alert.status, AlertStatus::Warning);
    assert_eq!(alert.diagnosis, "Shock");

    let ack = timeout(Duration::from_secs(60), link.outbound.recv())
        .await
        .expect("timed out waiting for ack")
        .expect("outbound closed");
    let WireFrame::Text(text) = ack else {
        panic!("ack must be a text frame");
    };
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["toolAck"]["id"], "call-9");
    assert_eq!(value["toolAck"]["name"], "report_medical_status");
}

#[tokio::test(start_paused = true)]
async fn failed_acknowledgement_is_logged_and_non_fatal() {
    let (connector, mut links, _) = ScriptedConnector::with_links(1);
    let client = VigilClient::with_connector(config(ChannelMode::ToolCall), Arc::new(connector));
    let mut alerts = client.subscribe_alerts();
    let mut conn = client.subscribe_connection();

    client.start(None).await.unwrap();
    wait_for_state(&mut conn, ConnectionState::Connected).await;

    let link = links.remove(0);
    // The ack has nowhere to go once the outbound receiver is gone.
    drop(link.outbound);

    let invocation = r#"{"id":"call-1","name":"report_medical_status","args":{"status":"NORMAL","diagnosis":"Clear","confidence":0.8,"symptoms":[]}}"#;
    link.inbound
        .send(TransportEvent::Text(invocation.into()))
        .await
        .unwrap();

    // The alert still flows; the failed ack only bumps a counter.
    let alert = recv_alert(&mut alerts).await;
    assert_eq!(alert.diagnosis, "Clear");
    assert_eq!(client.diagnostics_snapshot().acks_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn unintended_close_reconnects_after_fixed_delay() {
    let (connector, mut links, attempts) = ScriptedConnector::with_links(2);
    let client = VigilClient::with_connector(config(ChannelMode::FreeText), Arc::new(connector));
    let mut alerts = client.subscribe_alerts();
    let mut conn = client.subscribe_connection();

    client.start(None).await.unwrap();
    wait_for_state(&mut conn, ConnectionState::Connected).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let link = links.remove(0);
    link.inbound
        .send(TransportEvent::Closed(Some("abnormal closure".into())))
        .await
        .unwrap();

    let event = wait_for_state(&mut conn, ConnectionState::Reconnecting).await;
    assert_eq!(event.detail.as_deref(), Some("abnormal closure"));

    // The fixed 3 s backoff elapses, a fresh transport is dialed.
    wait_for_state(&mut conn, ConnectionState::Connected).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    // The second link works end to end.
    let link = links.remove(0);
    link.inbound
        .send(TransportEvent::Text(NORMAL.into()))
        .await
        .unwrap();
    let alert = recv_alert(&mut alerts).await;
    assert_eq!(alert.status, AlertStatus::Normal);
}

#[tokio::test(start_paused = true)]
async fn intentional_stop_suppresses_reconnection() {
    let (connector, _links, attempts) = ScriptedConnector::with_links(2);
    let client = VigilClient::with_connector(config(ChannelMode::FreeText), Arc::new(connector));
    let mut conn = client.subscribe_connection();

    client.start(None).await.unwrap();
    wait_for_state(&mut conn, ConnectionState::Connected).await;

    client.stop().await.unwrap();
    wait_for_state(&mut conn, ConnectionState::Disconnected).await;

    // Well past the backoff window: no further attempt may occur.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn critical_alerts_produce_debounced_replay_artifacts() {
    let (connector, mut links, _) = ScriptedConnector::with_links(1);
    let client = VigilClient::with_connector(config(ChannelMode::FreeText), Arc::new(connector));
    let mut conn = client.subscribe_connection();
    let mut replays = client.subscribe_replays();

    client.start(None).await.unwrap();
    wait_for_state(&mut conn, ConnectionState::Connected).await;
    let link = links.remove(0);

    // Six segments: the ring keeps the last five.
    for seq in 0u8..6 {
        client.push_segment(vec![seq; 2]);
    }
    // Let the segment events drain into the actor before triggering.
    tokio::time::sleep(Duration::from_millis(50)).await;

    link.inbound
        .send(TransportEvent::Text(STROKE.into()))
        .await
        .unwrap();

    let artifact = timeout(Duration::from_secs(60), replays.recv())
        .await
        .expect("timed out waiting for replay")
        .expect("replay channel closed");
    assert_eq!(artifact.reason, "Stroke — symptoms: droop");
    assert_eq!(
        artifact.bytes,
        vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5],
        "artifact must hold the last five segments, oldest first"
    );

    // A second CRITICAL two seconds later is inside the debounce window.
    tokio::time::sleep(Duration::from_secs(2)).await;
    link.inbound
        .send(TransportEvent::Text(STROKE.into()))
        .await
        .unwrap();
    assert!(
        timeout(Duration::from_secs(5), replays.recv()).await.is_err(),
        "debounced trigger must not produce an artifact"
    );

    // Eleven seconds after the first artifact a new trigger goes through.
    tokio::time::sleep(Duration::from_secs(11)).await;
    link.inbound
        .send(TransportEvent::Text(STROKE.into()))
        .await
        .unwrap();
    let second = timeout(Duration::from_secs(60), replays.recv())
        .await
        .expect("timed out waiting for second replay")
        .expect("replay channel closed");
    assert_eq!(second.reason, "Stroke — symptoms: droop");

    let snapshot = client.diagnostics_snapshot();
    assert_eq!(snapshot.replays_produced, 2);
    assert_eq!(snapshot.replays_suppressed, 1);
}

#[tokio::test(start_paused = true)]
async fn socket_records_bypass_extraction() {
    let (connector, mut links, _) = ScriptedConnector::with_links(1);
    let client =
        VigilClient::with_connector(config(ChannelMode::DuplexSocket), Arc::new(connector));
    let mut alerts = client.subscribe_alerts();
    let mut conn = client.subscribe_connection();

    client.start(None).await.unwrap();
    wait_for_state(&mut conn, ConnectionState::Connected).await;

    let link = links.remove(0);
    // Two newline-delimited records in one frame.
    link.inbound
        .send(TransportEvent::Text(format!("{STROKE}\n{NORMAL}\n")))
        .await
        .unwrap();

    assert_eq!(recv_alert(&mut alerts).await.diagnosis, "Stroke");
    assert_eq!(recv_alert(&mut alerts).await.diagnosis, "Normal");
}
