//! # vigil-core
//!
//! Real-time medical-alert streaming client SDK.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioFeed → SPSC RingBuffer → audio uplink loop ─┐
//! VideoSource → video uplink loop (200 ms, JPEG) ───────────────┤
//!                                                               ▼
//!                                                     UplinkGate (lossy)
//!                                                               │
//!                    SessionActor ◄── typed event queue ◄── transport pumps
//!                         │
//!              EventBuffer → StreamExtractor → AlertNormalizer
//!                         │
//!              broadcast::Sender<Alert> / <ConnectionEvent> / <ReplayArtifact>
//!                         │
//!              EvidenceRingBuffer (N=5, debounced replay on CRITICAL)
//! ```
//!
//! The capture callback path is non-blocking and allocation-free; all heap
//! work happens on the actor task and the uplink loops. Every mutation of
//! the text accumulator, the session state and the evidence ring goes
//! through one single-owner actor, so no locks guard those aggregates.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod alert;
pub mod client;
pub mod error;
pub mod evidence;
pub mod events;
pub mod extract;
pub mod media;
pub mod session;

// Convenience re-exports for downstream crates
pub use alert::{Alert, AlertCandidate, AlertStatus};
pub use client::{ChannelMode, ClientConfig, DiagnosticsSnapshot, VigilClient};
pub use error::VigilError;
pub use events::ConnectionEvent;
pub use evidence::{EvidenceSegment, ReplayArtifact};
pub use media::{AudioFeed, VideoFrame, VideoSource};
pub use session::transport::{Connector, Transport, TransportEvent, WireFrame, WsConnector};
pub use session::ConnectionState;
