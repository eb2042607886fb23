//! Session state machine and single-owner actor.
//!
//! ## States
//!
//! ```text
//! Disconnected ──start──► Connecting ──open──► Connected
//!      ▲                      │                    │
//!      │ stop (intentional)   │ error              │ close/error
//!      │                      ▼                    ▼
//!      └─────────────── Reconnecting ◄─────────────┘
//!                             │ fixed 3 s timer
//!                             └──────► Connecting …
//! ```
//!
//! ## Ownership
//!
//! One tokio task owns everything mutable: the text accumulator and
//! extractor, the session state, the evidence ring and replay gate, and
//! the transport handles. Every stimulus — inbound frames, transport
//! closure, timer firings, segment hand-offs, start/stop requests —
//! arrives as a [`SessionEvent`] on one queue and is processed strictly in
//! arrival order, so none of those aggregates needs a lock and the replay
//! debounce check is atomic with respect to new triggers.
//!
//! Timers fire back into the queue carrying a generation (reconnect) or
//! epoch (replay) marker checked at delivery time; a stale timer from a
//! torn-down link or a stopped session never mutates current state. An
//! intentional stop aborts both pending timers synchronously inside its
//! handler.

pub mod toolcall;
pub mod transport;
pub mod wire;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::alert::{self, Alert};
use crate::client::{ChannelMode, ClientConfig, ClientDiagnostics};
use crate::events::ConnectionEvent;
use crate::evidence::{EvidenceRingBuffer, EvidenceSegment, ReplayArtifact, ReplayGate};
use crate::extract::StreamExtractor;
use transport::{Connector, Transport, TransportEvent, WireFrame};
use wire::ToolInvocation;

/// Fixed delay before each reconnect attempt. Baseline behavior: no
/// exponential growth, no attempt ceiling.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Connection state of the session to the remote inference endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Initial and terminal state; no transport exists.
    Disconnected,
    /// Dialing / awaiting handshake completion.
    Connecting,
    /// Live link; the uplink gate is valid.
    Connected,
    /// Link lost unintentionally; a reconnect attempt is scheduled.
    Reconnecting,
}

/// Outcome of a gated uplink send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Queue full — frame discarded, freshness over completeness.
    Dropped,
    /// No valid link — frame discarded silently.
    Disconnected,
}

/// Validity gate consulted by the uplink loops before every send.
///
/// Holds the outbound sender of the current transport, or nothing. The
/// actor installs/clears it atomically with the matching state change, so
/// a send can never land on a torn-down session.
#[derive(Default)]
pub struct UplinkGate {
    sender: Mutex<Option<mpsc::Sender<WireFrame>>>,
}

impl UplinkGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn install(&self, sender: mpsc::Sender<WireFrame>) {
        *self.sender.lock() = Some(sender);
    }

    pub(crate) fn clear(&self) {
        *self.sender.lock() = None;
    }

    pub fn is_valid(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Non-blocking send. Never queues, never retries.
    pub fn try_send(&self, frame: WireFrame) -> SendOutcome {
        let guard = self.sender.lock();
        match guard.as_ref() {
            None => SendOutcome::Disconnected,
            Some(tx) => match tx.try_send(frame) {
                Ok(()) => SendOutcome::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Dropped,
                Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Disconnected,
            },
        }
    }
}

/// Everything the actor reacts to, delivered on one queue.
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Start,
    Stop,
    /// Terminal stop: handle `Stop` semantics, then exit the actor task.
    Shutdown,
    ConnectFinished {
        generation: u64,
        result: crate::error::Result<Transport>,
    },
    Inbound {
        generation: u64,
        event: TransportEvent,
    },
    LinkClosed {
        generation: u64,
        reason: Option<String>,
    },
    ReconnectDue {
        generation: u64,
    },
    ReplayDue {
        epoch: u64,
    },
    Segment(EvidenceSegment),
}

/// Task handles of a live link, owned by the actor until teardown.
/// The link's outbound sender lives in the [`UplinkGate`] while installed.
struct LinkTasks {
    pump: JoinHandle<()>,
    io: Vec<JoinHandle<()>>,
}

impl LinkTasks {
    fn abort(self) {
        self.pump.abort();
        for task in self.io {
            task.abort();
        }
    }
}

pub(crate) struct SessionActor {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    state: ConnectionState,
    /// Snapshot mirror read by `VigilClient::state()`.
    status: Arc<Mutex<ConnectionState>>,
    intentional_stop: bool,
    /// Transport incarnation counter; bumped per connect attempt and on stop.
    generation: u64,
    /// Session lifetime counter; bumped on stop only. Guards replay timers,
    /// which must survive reconnects but not an intentional stop.
    epoch: u64,
    uplink: Arc<UplinkGate>,
    link: Option<LinkTasks>,
    reconnect_timer: Option<JoinHandle<()>>,
    replay_timer: Option<JoinHandle<()>>,
    pending_replay_reason: Option<String>,
    extractor: StreamExtractor,
    ring: EvidenceRingBuffer,
    replay_gate: ReplayGate,
    alerts_tx: broadcast::Sender<Alert>,
    connection_tx: broadcast::Sender<ConnectionEvent>,
    replays_tx: broadcast::Sender<ReplayArtifact>,
    diagnostics: Arc<ClientDiagnostics>,
}

pub(crate) struct SessionActorContext {
    pub config: ClientConfig,
    pub connector: Arc<dyn Connector>,
    pub events_tx: mpsc::Sender<SessionEvent>,
    pub events_rx: mpsc::Receiver<SessionEvent>,
    pub status: Arc<Mutex<ConnectionState>>,
    pub uplink: Arc<UplinkGate>,
    pub alerts_tx: broadcast::Sender<Alert>,
    pub connection_tx: broadcast::Sender<ConnectionEvent>,
    pub replays_tx: broadcast::Sender<ReplayArtifact>,
    pub diagnostics: Arc<ClientDiagnostics>,
}

impl SessionActor {
    pub(crate) fn new(ctx: SessionActorContext) -> Self {
        let replay_gate = ReplayGate::new(ctx.config.replay_debounce);
        Self {
            config: ctx.config,
            connector: ctx.connector,
            events_tx: ctx.events_tx,
            events_rx: ctx.events_rx,
            state: ConnectionState::Disconnected,
            status: ctx.status,
            intentional_stop: false,
            generation: 0,
            epoch: 0,
            uplink: ctx.uplink,
            link: None,
            reconnect_timer: None,
            replay_timer: None,
            pending_replay_reason: None,
            extractor: StreamExtractor::new(),
            ring: EvidenceRingBuffer::new(),
            replay_gate,
            alerts_tx: ctx.alerts_tx,
            connection_tx: ctx.connection_tx,
            replays_tx: ctx.replays_tx,
            diagnostics: ctx.diagnostics,
        }
    }

    /// Run until a `Shutdown` event arrives or every sender is gone.
    pub(crate) async fn run(mut self) {
        info!("session actor started");
        while let Some(event) = self.events_rx.recv().await {
            match event {
                SessionEvent::Start => self.handle_start(),
                SessionEvent::Stop => self.handle_stop(),
                SessionEvent::Shutdown => {
                    self.handle_stop();
                    break;
                }
                SessionEvent::ConnectFinished { generation, result } => {
                    self.handle_connect_finished(generation, result)
                }
                SessionEvent::Inbound { generation, event } => {
                    self.handle_inbound(generation, event)
                }
                SessionEvent::LinkClosed { generation, reason } => {
                    self.handle_link_closed(generation, reason)
                }
                SessionEvent::ReconnectDue { generation } => self.handle_reconnect_due(generation),
                SessionEvent::ReplayDue { epoch } => self.handle_replay_due(epoch),
                SessionEvent::Segment(segment) => self.ring.append(segment),
            }
        }
        self.teardown_link();
        info!("session actor stopped");
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    fn handle_start(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!(state = ?self.state, "start request ignored — not disconnected");
            return;
        }
        self.intentional_stop = false;
        self.begin_connect();
    }

    fn handle_stop(&mut self) {
        self.intentional_stop = true;

        // Cancel pending timers synchronously; bump the markers so any
        // already-fired event still in the queue is ignored on delivery.
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.replay_timer.take() {
            timer.abort();
        }
        self.pending_replay_reason = None;
        self.replay_gate.cancel_pending();
        self.generation += 1;
        self.epoch += 1;

        self.teardown_link();
        if self.state != ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected, None);
        }
    }

    fn begin_connect(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.diagnostics.bump_connect_attempts();
        self.set_state(ConnectionState::Connecting, None);

        let connector = Arc::clone(&self.connector);
        let config = self.config.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = connector.connect(&config).await;
            let _ = events_tx
                .send(SessionEvent::ConnectFinished { generation, result })
                .await;
        });
    }

    fn handle_connect_finished(
        &mut self,
        generation: u64,
        result: crate::error::Result<Transport>,
    ) {
        if generation != self.generation {
            // A stop or a newer attempt superseded this one.
            if let Ok(transport) = result {
                transport.abort_io();
            }
            return;
        }

        match result {
            Ok(transport) => {
                self.install_link(transport);
                self.set_state(ConnectionState::Connected, None);
            }
            Err(e) => {
                warn!(error = %e, "connect attempt failed");
                if !self.intentional_stop {
                    self.enter_reconnecting(Some(e.to_string()));
                }
            }
        }
    }

    fn install_link(&mut self, transport: Transport) {
        let Transport {
            outbound,
            inbound,
            io_tasks,
        } = transport;

        self.uplink.install(outbound);
        let pump = self.spawn_inbound_pump(self.generation, inbound);
        self.link = Some(LinkTasks {
            pump,
            io: io_tasks,
        });
    }

    fn spawn_inbound_pump(
        &self,
        generation: u64,
        mut inbound: mpsc::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                match event {
                    TransportEvent::Closed(reason) => {
                        let _ = events_tx
                            .send(SessionEvent::LinkClosed { generation, reason })
                            .await;
                        return;
                    }
                    other => {
                        if events_tx
                            .send(SessionEvent::Inbound {
                                generation,
                                event: other,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            let _ = events_tx
                .send(SessionEvent::LinkClosed {
                    generation,
                    reason: None,
                })
                .await;
        })
    }

    /// Invalidate the uplink gate and drop every handle of the current
    /// link. Called inside the same handler that changes state, so the
    /// gate can never be valid against a torn-down session.
    fn teardown_link(&mut self) {
        self.uplink.clear();
        if let Some(link) = self.link.take() {
            link.abort();
        }
    }

    fn handle_link_closed(&mut self, generation: u64, reason: Option<String>) {
        if generation != self.generation {
            return;
        }
        if self.intentional_stop {
            return;
        }
        warn!(reason = ?reason, "transport closed unexpectedly");
        self.enter_reconnecting(reason);
    }

    fn enter_reconnecting(&mut self, detail: Option<String>) {
        self.teardown_link();
        self.set_state(ConnectionState::Reconnecting, detail);

        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        let generation = self.generation;
        let delay = self.config.reconnect_delay;
        let events_tx = self.events_tx.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events_tx
                .send(SessionEvent::ReconnectDue { generation })
                .await;
        }));
    }

    fn handle_reconnect_due(&mut self, generation: u64) {
        if generation != self.generation
            || self.intentional_stop
            || self.state != ConnectionState::Reconnecting
        {
            return;
        }
        self.reconnect_timer = None;
        self.begin_connect();
    }

    fn set_state(&mut self, state: ConnectionState, detail: Option<String>) {
        self.state = state;
        *self.status.lock() = state;
        info!(state = ?state, detail = ?detail, "connection state changed");
        let _ = self.connection_tx.send(ConnectionEvent { state, detail });
    }

    // ── Inbound ──────────────────────────────────────────────────────────

    fn handle_inbound(&mut self, generation: u64, event: TransportEvent) {
        if generation != self.generation {
            return;
        }
        match (self.config.mode, event) {
            (ChannelMode::FreeText, TransportEvent::Text(text)) => self.ingest_text(&text),
            (ChannelMode::ToolCall, TransportEvent::Text(text)) => self.ingest_invocation(&text),
            (ChannelMode::DuplexSocket, TransportEvent::Text(text)) => {
                self.ingest_records(&text)
            }
            (_, TransportEvent::Binary(bytes)) => {
                trace!(len = bytes.len(), "ignoring inbound binary frame");
            }
            // The pump maps Closed to LinkClosed before it gets here.
            (_, TransportEvent::Closed(_)) => {}
        }
    }

    /// Free-text channel: accumulate, extract complete spans, normalize.
    fn ingest_text(&mut self, text: &str) {
        let spans = self.extractor.append(text);
        self.diagnostics
            .set_buffer_truncations(self.extractor.truncations());
        for span in spans {
            match alert::parse_candidate(&span) {
                Some(candidate) => match alert::normalize(candidate) {
                    Some(alert) => self.emit_alert(alert),
                    None => self.diagnostics.bump_validation_failures(),
                },
                None => self.diagnostics.bump_parse_failures(),
            }
        }
    }

    /// Tool-call channel: schema path, then acknowledge the invocation.
    fn ingest_invocation(&mut self, text: &str) {
        let invocation: ToolInvocation = match serde_json::from_str(text) {
            Ok(invocation) => invocation,
            Err(e) => {
                warn!(error = %e, "inbound frame is not a tool invocation");
                self.diagnostics.bump_parse_failures();
                return;
            }
        };

        if let Some(alert) = toolcall::adapt_invocation(&invocation) {
            self.emit_alert(alert);
        } else {
            self.diagnostics.bump_validation_failures();
        }

        // Ack regardless of validation outcome so the remote monitoring
        // loop keeps going. A failed ack send is logged and non-fatal.
        match self.uplink.try_send(wire::tool_ack(&invocation)) {
            SendOutcome::Sent => {}
            outcome => {
                self.diagnostics.bump_acks_failed();
                warn!(?outcome, name = %invocation.name, "failed to acknowledge tool invocation");
            }
        }
    }

    /// Fallback socket: record-delimited alert JSON, no brace scanning.
    fn ingest_records(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match alert::parse_candidate(line) {
                Some(candidate) => match alert::normalize(candidate) {
                    Some(alert) => self.emit_alert(alert),
                    None => self.diagnostics.bump_validation_failures(),
                },
                None => self.diagnostics.bump_parse_failures(),
            }
        }
    }

    // ── Alerts + evidence replay ─────────────────────────────────────────

    fn emit_alert(&mut self, alert: Alert) {
        self.diagnostics.bump_alerts_emitted();
        debug!(
            status = ?alert.status,
            diagnosis = %alert.diagnosis,
            confidence = alert.confidence,
            "alert emitted"
        );
        if alert.status.is_critical() {
            self.maybe_schedule_replay(&alert);
        }
        let _ = self.alerts_tx.send(alert);
    }

    fn maybe_schedule_replay(&mut self, alert: &Alert) {
        if !self.replay_gate.try_arm(Instant::now()) {
            self.diagnostics.bump_replays_suppressed();
            debug!(diagnosis = %alert.diagnosis, "replay trigger suppressed by debounce");
            return;
        }

        self.pending_replay_reason = Some(alert.reason());
        let epoch = self.epoch;
        let grace = self.config.replay_grace;
        let events_tx = self.events_tx.clone();
        self.replay_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = events_tx.send(SessionEvent::ReplayDue { epoch }).await;
        }));
    }

    fn handle_replay_due(&mut self, epoch: u64) {
        if epoch != self.epoch {
            return;
        }
        self.replay_timer = None;
        let Some(reason) = self.pending_replay_reason.take() else {
            return;
        };

        let artifact = ReplayArtifact {
            bytes: self.ring.snapshot_bytes(),
            reason,
        };
        self.replay_gate.mark_produced(Instant::now());
        self.diagnostics.bump_replays_produced();
        info!(
            segments = self.ring.len(),
            bytes = artifact.bytes.len(),
            reason = %artifact.reason,
            "replay artifact assembled"
        );
        let _ = self.replays_tx.send(artifact);
    }
}

impl std::fmt::Debug for SessionActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionActor")
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("intentional_stop", &self.intentional_stop)
            .finish_non_exhaustive()
    }
}
