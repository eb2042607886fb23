//! `VigilClient` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! VigilClient::new(config)
//!     └─► start()        → session actor connecting, uplink loops live
//!         └─► stop()     → intentional stop: timers cancelled, transport
//!                          torn down, no automatic reconnection
//!             └─► start() → fresh connect, same client
//! ```
//!
//! `start()`/`stop()` are guarded: calling them in the wrong state returns
//! an error rather than panicking.
//!
//! The client hands out one [`AudioFeed`] for the capture collaborator,
//! accepts evidence segments via [`VigilClient::push_segment`], and fans
//! out alerts, connection transitions and replay artifacts on broadcast
//! channels.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::alert::Alert;
use crate::error::{Result, VigilError};
use crate::events::ConnectionEvent;
use crate::evidence::{EvidenceSegment, ReplayArtifact};
use crate::media::{self, AudioFeed, CaptureConsumer, VideoSource};
use crate::session::transport::{Connector, WsConnector};
use crate::session::{ConnectionState, SessionActor, SessionActorContext, SessionEvent, UplinkGate};

/// Broadcast channel capacity: events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Session event queue depth. Segment hand-offs and transport frames share
/// it; 256 rides out normal bursts without unbounded growth.
const EVENT_QUEUE: usize = 256;

/// Which inbound protocol the remote endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelMode {
    /// Arbitrary streamed text; alerts are brace-scanned out of it.
    FreeText,
    /// Named structured invocations, each requiring an acknowledgement.
    ToolCall,
    /// Fallback duplex socket: record-delimited alert JSON inbound.
    DuplexSocket,
}

/// Configuration for [`VigilClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the remote inference service.
    pub endpoint: String,
    /// Optional API key, appended as a query parameter when dialing.
    pub api_key: Option<String>,
    pub mode: ChannelMode,
    /// Rate of the samples the collaborator pushes (Hz). Default: 16000.
    pub capture_sample_rate: u32,
    /// Rate the endpoint expects (Hz). Default: 16000.
    pub uplink_sample_rate: u32,
    /// Video capture period. Default: 200 ms.
    pub video_interval: Duration,
    /// Fixed delay before a reconnect attempt. Default: 3 s.
    pub reconnect_delay: Duration,
    /// Minimum spacing between replay artifacts. Default: 10 s.
    pub replay_debounce: Duration,
    /// Wait before snapshotting the evidence ring. Default: 500 ms.
    pub replay_grace: Duration,
    /// Outbound frame queue depth; overflow is dropped, not buffered.
    pub outbound_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8000/ws".into(),
            api_key: None,
            mode: ChannelMode::FreeText,
            capture_sample_rate: 16_000,
            uplink_sample_rate: 16_000,
            video_interval: Duration::from_millis(200),
            reconnect_delay: crate::session::RECONNECT_DELAY,
            replay_debounce: crate::evidence::REPLAY_DEBOUNCE,
            replay_grace: crate::evidence::REPLAY_GRACE,
            outbound_queue: 32,
        }
    }
}

/// Shared observability counters: lock-free bumps everywhere, one
/// consistent-enough snapshot read.
#[derive(Debug, Default)]
pub struct ClientDiagnostics {
    alerts_emitted: AtomicU64,
    parse_failures: AtomicU64,
    validation_failures: AtomicU64,
    buffer_truncations: AtomicU64,
    audio_frames_sent: AtomicU64,
    audio_frames_dropped: AtomicU64,
    video_frames_sent: AtomicU64,
    video_frames_dropped: AtomicU64,
    video_capture_errors: AtomicU64,
    connect_attempts: AtomicU64,
    replays_produced: AtomicU64,
    replays_suppressed: AtomicU64,
    acks_failed: AtomicU64,
}

macro_rules! bump {
    ($name:ident, $field:ident) => {
        pub(crate) fn $name(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl ClientDiagnostics {
    bump!(bump_alerts_emitted, alerts_emitted);
    bump!(bump_parse_failures, parse_failures);
    bump!(bump_validation_failures, validation_failures);
    bump!(bump_audio_frames_sent, audio_frames_sent);
    bump!(bump_audio_frames_dropped, audio_frames_dropped);
    bump!(bump_video_frames_sent, video_frames_sent);
    bump!(bump_video_frames_dropped, video_frames_dropped);
    bump!(bump_video_capture_errors, video_capture_errors);
    bump!(bump_connect_attempts, connect_attempts);
    bump!(bump_replays_produced, replays_produced);
    bump!(bump_replays_suppressed, replays_suppressed);
    bump!(bump_acks_failed, acks_failed);

    pub(crate) fn set_buffer_truncations(&self, value: u64) {
        self.buffer_truncations.store(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            buffer_truncations: self.buffer_truncations.load(Ordering::Relaxed),
            audio_frames_sent: self.audio_frames_sent.load(Ordering::Relaxed),
            audio_frames_dropped: self.audio_frames_dropped.load(Ordering::Relaxed),
            video_frames_sent: self.video_frames_sent.load(Ordering::Relaxed),
            video_frames_dropped: self.video_frames_dropped.load(Ordering::Relaxed),
            video_capture_errors: self.video_capture_errors.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            replays_produced: self.replays_produced.load(Ordering::Relaxed),
            replays_suppressed: self.replays_suppressed.load(Ordering::Relaxed),
            acks_failed: self.acks_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiagnosticsSnapshot {
    pub alerts_emitted: u64,
    pub parse_failures: u64,
    pub validation_failures: u64,
    pub buffer_truncations: u64,
    pub audio_frames_sent: u64,
    pub audio_frames_dropped: u64,
    pub video_frames_sent: u64,
    pub video_frames_dropped: u64,
    pub video_capture_errors: u64,
    pub connect_attempts: u64,
    pub replays_produced: u64,
    pub replays_suppressed: u64,
    pub acks_failed: u64,
}

/// The top-level client handle.
///
/// `VigilClient` is `Send + Sync`; all fields use interior mutability.
/// Wrap in `Arc` to share between the host application and its
/// event-forwarding tasks.
pub struct VigilClient {
    config: ClientConfig,
    events_tx: mpsc::Sender<SessionEvent>,
    status: Arc<Mutex<ConnectionState>>,
    /// `true` while the uplink loops may send.
    running: Arc<AtomicBool>,
    uplink: Arc<UplinkGate>,
    alerts_tx: broadcast::Sender<Alert>,
    connection_tx: broadcast::Sender<ConnectionEvent>,
    replays_tx: broadcast::Sender<ReplayArtifact>,
    diagnostics: Arc<ClientDiagnostics>,
    feed: Mutex<Option<AudioFeed>>,
    capture_consumer: Mutex<Option<CaptureConsumer>>,
    segment_seq: AtomicU64,
    actor_task: Mutex<Option<JoinHandle<()>>>,
    audio_task: Mutex<Option<JoinHandle<()>>>,
    video_task: Mutex<Option<JoinHandle<()>>>,
}

impl VigilClient {
    /// Create a client using the production WebSocket connector.
    ///
    /// Must be called from within a tokio runtime: the session actor task
    /// is spawned here so `start()` can be a plain message send.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Create a client with a custom [`Connector`] (tests script this).
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (alerts_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (connection_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (replays_tx, _) = broadcast::channel(BROADCAST_CAP);
        let status = Arc::new(Mutex::new(ConnectionState::Disconnected));
        let uplink = Arc::new(UplinkGate::new());
        let diagnostics = Arc::new(ClientDiagnostics::default());

        let actor = SessionActor::new(SessionActorContext {
            config: config.clone(),
            connector,
            events_tx: events_tx.clone(),
            events_rx,
            status: Arc::clone(&status),
            uplink: Arc::clone(&uplink),
            alerts_tx: alerts_tx.clone(),
            connection_tx: connection_tx.clone(),
            replays_tx: replays_tx.clone(),
            diagnostics: Arc::clone(&diagnostics),
        });
        let actor_task = tokio::spawn(actor.run());

        let (producer, consumer) = media::create_capture_ring();

        Self {
            config,
            events_tx,
            status,
            running: Arc::new(AtomicBool::new(false)),
            uplink,
            alerts_tx,
            connection_tx,
            replays_tx,
            diagnostics,
            feed: Mutex::new(Some(AudioFeed::new(producer))),
            capture_consumer: Mutex::new(Some(consumer)),
            segment_seq: AtomicU64::new(0),
            actor_task: Mutex::new(Some(actor_task)),
            audio_task: Mutex::new(None),
            video_task: Mutex::new(None),
        }
    }

    /// Start the session and the uplink loops.
    ///
    /// `video` is the optional external frame source; audio flows through
    /// the [`AudioFeed`] handle regardless.
    ///
    /// # Errors
    /// - `VigilError::AlreadyRunning` if already started.
    pub async fn start(&self, video: Option<Box<dyn VideoSource>>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(VigilError::AlreadyRunning);
        }

        // The audio uplink is spawned once and survives stop/start cycles;
        // it idles (drain + discard) while `running` is false.
        if let Some(consumer) = self.capture_consumer.lock().take() {
            let task = media::spawn_audio_uplink(
                consumer,
                &self.config,
                Arc::clone(&self.uplink),
                Arc::clone(&self.running),
                Arc::clone(&self.diagnostics),
            );
            *self.audio_task.lock() = Some(task);
        }

        if let Some(source) = video {
            let task = media::spawn_video_uplink(
                source,
                &self.config,
                Arc::clone(&self.uplink),
                Arc::clone(&self.running),
                Arc::clone(&self.diagnostics),
            );
            *self.video_task.lock() = Some(task);
        }

        self.send_event(SessionEvent::Start).await?;
        info!(endpoint = %self.config.endpoint, mode = ?self.config.mode, "client started");
        Ok(())
    }

    /// Intentional stop: no automatic reconnection afterwards.
    ///
    /// # Errors
    /// - `VigilError::NotRunning` if not currently started.
    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(VigilError::NotRunning);
        }
        if let Some(task) = self.video_task.lock().take() {
            task.abort();
        }
        self.send_event(SessionEvent::Stop).await?;
        info!("client stop requested");
        Ok(())
    }

    /// Take the audio feed handle. Available exactly once.
    pub fn audio_feed(&self) -> Result<AudioFeed> {
        self.feed.lock().take().ok_or(VigilError::AudioFeedTaken)
    }

    /// Hand one recorded media segment to the evidence ring.
    ///
    /// Fire-and-forget from the recording collaborator's timer; a full
    /// event queue drops the segment with a warning rather than blocking.
    pub fn push_segment(&self, bytes: Vec<u8>) {
        let seq = self.segment_seq.fetch_add(1, Ordering::Relaxed);
        let segment = EvidenceSegment { seq, bytes };
        if self
            .events_tx
            .try_send(SessionEvent::Segment(segment))
            .is_err()
        {
            warn!(seq, "segment dropped — session event queue unavailable");
        }
    }

    /// Current connection state (snapshot).
    pub fn state(&self) -> ConnectionState {
        *self.status.lock()
    }

    /// Subscribe to normalized alerts.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts_tx.subscribe()
    }

    /// Subscribe to connection-state transitions (with error detail).
    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection_tx.subscribe()
    }

    /// Subscribe to replay artifacts.
    pub fn subscribe_replays(&self) -> broadcast::Receiver<ReplayArtifact> {
        self.replays_tx.subscribe()
    }

    /// Snapshot of client counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    async fn send_event(&self, event: SessionEvent) -> Result<()> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| VigilError::SessionGone)
    }
}

impl Drop for VigilClient {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Best-effort terminal stop; the actor exits its loop on Shutdown.
        let _ = self.events_tx.try_send(SessionEvent::Shutdown);
        if let Some(task) = self.audio_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.video_task.lock().take() {
            task.abort();
        }
        // The actor task detaches and exits once it processes Shutdown
        // (or when the event queue fully closes).
        drop(self.actor_task.lock().take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_baselines() {
        let config = ClientConfig::default();
        assert_eq!(config.video_interval, Duration::from_millis(200));
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.replay_debounce, Duration::from_secs(10));
        assert_eq!(config.replay_grace, Duration::from_millis(500));
        assert_eq!(config.uplink_sample_rate, 16_000);
        assert_eq!(config.mode, ChannelMode::FreeText);
    }

    #[test]
    fn channel_mode_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ChannelMode::FreeText).unwrap(),
            r#""free-text""#
        );
        let mode: ChannelMode = serde_json::from_str(r#""duplex-socket""#).unwrap();
        assert_eq!(mode, ChannelMode::DuplexSocket);
    }

    #[tokio::test]
    async fn audio_feed_is_taken_exactly_once() {
        let client = VigilClient::new(ClientConfig::default());
        assert!(client.audio_feed().is_ok());
        assert!(matches!(
            client.audio_feed(),
            Err(VigilError::AudioFeedTaken)
        ));
    }

    #[tokio::test]
    async fn stop_before_start_is_an_error() {
        let client = VigilClient::new(ClientConfig::default());
        assert!(matches!(client.stop().await, Err(VigilError::NotRunning)));
    }
}
