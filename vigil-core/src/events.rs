//! Events broadcast to the rendering collaborator.
//!
//! Rendering owns all presentation; the core only fans these out on
//! `tokio::sync::broadcast` channels and never calls back into a consumer
//! from inside its own critical section.

use serde::{Deserialize, Serialize};

use crate::session::ConnectionState;

/// Emitted whenever the session state machine transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEvent {
    pub state: ConnectionState,
    /// Optional error detail (e.g. the transport close reason).
    pub detail: Option<String>,
}
