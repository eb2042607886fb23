//! Console rendering: alert readout, connection transitions, and replay
//! export to WAV. Owns all presentation; the core only broadcasts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vigil_core::{Alert, AlertStatus, ConnectionEvent, ReplayArtifact};

fn status_tag(status: AlertStatus) -> &'static str {
    match status {
        AlertStatus::Normal => "NORMAL  ",
        AlertStatus::Warning => "WARNING ",
        AlertStatus::Critical => "CRITICAL",
    }
}

pub fn spawn_alert_printer(mut alerts: broadcast::Receiver<Alert>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(alert) => {
                    println!(
                        "[{}] {} ({:.0}%)  {}",
                        status_tag(alert.status),
                        alert.diagnosis,
                        alert.confidence * 100.0,
                        alert.symptoms.join(", "),
                    );
                    if let Some(feedback) = &alert.cpr_feedback {
                        println!("           CPR: {feedback}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "alert printer lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

pub fn spawn_connection_printer(
    mut events: broadcast::Receiver<ConnectionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match &event.detail {
                    Some(detail) => println!("-- link {:?}: {detail}", event.state),
                    None => println!("-- link {:?}", event.state),
                },
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

/// Export each replay artifact as a mono PCM16 WAV next to a reason log
/// line. Export failures are logged, never fatal.
pub fn spawn_replay_exporter(
    mut replays: broadcast::Receiver<ReplayArtifact>,
    dir: PathBuf,
    sample_rate: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match replays.recv().await {
                Ok(artifact) => {
                    let stamp = Local::now().format("%Y%m%d-%H%M%S");
                    let path = dir.join(format!("replay-{stamp}.wav"));
                    match write_wav(&path, &artifact.bytes, sample_rate) {
                        Ok(()) => {
                            println!("** replay saved: {} ({})", path.display(), artifact.reason);
                            info!(path = %path.display(), reason = %artifact.reason, "replay exported");
                        }
                        Err(e) => warn!(error = %e, "replay export failed"),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

/// Write little-endian PCM16 bytes as a mono WAV file.
fn write_wav(path: &Path, pcm_le: &[u8], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for pair in pcm_le.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
    }
    writer.finalize().context("finalizing wav")?;
    Ok(())
}
