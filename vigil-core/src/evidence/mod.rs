//! Bounded evidence ring and debounced replay assembly.
//!
//! The recording collaborator hands the core one short media segment per
//! second. The ring keeps the most recent five; on a CRITICAL alert the
//! current contents are concatenated into a replay artifact, after a short
//! grace delay that lets the in-flight segment finish arriving. A second
//! trigger inside the debounce window (or while a snapshot is already
//! pending) is dropped silently — not deferred, not queued.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Fixed ring capacity: five ~1 s segments of look-back.
pub const EVIDENCE_CAPACITY: usize = 5;

/// Minimum spacing between two produced replay artifacts.
pub const REPLAY_DEBOUNCE: Duration = Duration::from_secs(10);

/// Wait before snapshotting so the in-flight segment can land.
pub const REPLAY_GRACE: Duration = Duration::from_millis(500);

/// One short media segment from the recording collaborator.
#[derive(Debug, Clone)]
pub struct EvidenceSegment {
    /// Monotonic sequence index assigned at hand-off.
    pub seq: u64,
    /// Encoded payload bytes (nominally ~1 s of media).
    pub bytes: Vec<u8>,
}

/// Fixed-capacity FIFO of recent segments; oldest evicted first.
///
/// Invariant: `len() <= EVIDENCE_CAPACITY` always holds.
#[derive(Debug, Default)]
pub struct EvidenceRingBuffer {
    segments: VecDeque<EvidenceSegment>,
}

impl EvidenceRingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push to the tail; evict the head when over capacity. O(1).
    pub fn append(&mut self, segment: EvidenceSegment) {
        self.segments.push_back(segment);
        while self.segments.len() > EVIDENCE_CAPACITY {
            self.segments.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Sequence indices currently held, oldest first.
    pub fn sequence_indices(&self) -> Vec<u64> {
        self.segments.iter().map(|s| s.seq).collect()
    }

    /// Concatenate the current contents, oldest first.
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        let total: usize = self.segments.iter().map(|s| s.bytes.len()).sum();
        let mut out = Vec::with_capacity(total);
        for segment in &self.segments {
            out.extend_from_slice(&segment.bytes);
        }
        out
    }
}

/// Replay artifact handed to the rendering collaborator.
///
/// The core does not retain it after hand-off; export and display are the
/// renderer's concern.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayArtifact {
    /// Concatenated ring contents at snapshot time.
    pub bytes: Vec<u8>,
    /// Diagnosis plus symptom list of the triggering alert.
    pub reason: String,
}

/// Debounce + grace bookkeeping for replay triggers.
///
/// Time is injected so the policy is testable without sleeping. The session
/// actor owns this gate and routes every trigger and every grace-timer
/// firing through its single event queue, which makes the debounce check
/// atomic with respect to new triggers.
#[derive(Debug)]
pub struct ReplayGate {
    debounce: Duration,
    last_produced: Option<Instant>,
    pending: bool,
}

impl ReplayGate {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_produced: None,
            pending: false,
        }
    }

    /// Try to arm a snapshot at `now`. Returns `false` — drop the trigger —
    /// when a snapshot is already pending or the last artifact was produced
    /// inside the debounce window.
    pub fn try_arm(&mut self, now: Instant) -> bool {
        if self.pending {
            return false;
        }
        if let Some(last) = self.last_produced {
            if now.duration_since(last) < self.debounce {
                return false;
            }
        }
        self.pending = true;
        true
    }

    /// Record that the armed snapshot was produced at `now`.
    pub fn mark_produced(&mut self, now: Instant) {
        self.pending = false;
        self.last_produced = Some(now);
    }

    /// Abandon an armed snapshot (session teardown).
    pub fn cancel_pending(&mut self) {
        self.pending = false;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}
