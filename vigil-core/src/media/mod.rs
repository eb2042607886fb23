//! Fixed-cadence media uplink: continuous audio encode/send plus periodic
//! video capture/send, both lossy under backpressure.
//!
//! # Design constraints
//!
//! The collaborator's capture callback runs on an OS audio thread. It
//! **must not** allocate, block, or perform I/O. [`AudioFeed::push`]
//! satisfies that contract with a lock-free SPSC `push_slice`; everything
//! heavier happens on the uplink tasks.
//!
//! Both uplink loops consult the session validity gate before every send
//! and silently drop when it is invalid or the outbound queue is full —
//! frames are time-sensitive, and a stale frame sent after a reconnect
//! would misrepresent current conditions. No queueing, no retry.

pub mod pcm;
pub mod resample;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use ringbuf::{traits::Split, HeapRb};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub use ringbuf::traits::{Consumer, Producer};

use crate::client::{ClientConfig, ClientDiagnostics};
use crate::error::{Result, VigilError};
use crate::session::wire;
use crate::session::{SendOutcome, UplinkGate};

/// Producer half of the capture ring — held by the audio callback side.
pub type CaptureProducer = ringbuf::HeapProd<f32>;

/// Consumer half — drained by the audio uplink task.
pub type CaptureConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^20 f32 samples ≈ 21.8 s at 48 kHz. Enough to
/// ride out scheduler hiccups without the callback ever dropping locally.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 20;

/// Samples drained from the ring per uplink iteration (at capture rate).
const DRAIN_CHUNK: usize = 960;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// JPEG quality for uplink frames. Small beats pretty at 5 fps.
const JPEG_QUALITY: u8 = 70;

/// Create a matched producer/consumer pair for the capture ring.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    HeapRb::<f32>::new(CAPTURE_RING_CAPACITY).split()
}

/// Handle the media-acquisition collaborator pushes samples through.
///
/// Wait-free; safe to call from a real-time audio callback.
pub struct AudioFeed {
    producer: CaptureProducer,
}

impl AudioFeed {
    pub(crate) fn new(producer: CaptureProducer) -> Self {
        Self { producer }
    }

    /// Push a block of mono f32 samples. Returns how many were accepted;
    /// the rest are dropped (the uplink has fallen far behind).
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            warn!(dropped = samples.len() - written, "capture ring full");
        }
        written
    }
}

/// One raw video frame from the external media source.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Packed RGB8 pixels, row-major.
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Pull-based video frame provider, implemented by the collaborator.
///
/// Called once per video tick on the uplink task. Returning `Ok(None)`
/// (no frame ready) is normal; errors are logged and the loop continues.
pub trait VideoSource: Send + 'static {
    fn capture_frame(&mut self) -> Result<Option<VideoFrame>>;
}

/// JPEG-encode a raw RGB frame for the uplink.
pub fn encode_jpeg(frame: &VideoFrame) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode(
            &frame.rgb,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| VigilError::VideoEncode(e.to_string()))?;
    Ok(jpeg)
}

/// Spawn the audio uplink loop: drain → resample to 16 kHz → PCM16 →
/// encode for the active channel mode → gated lossy send.
pub(crate) fn spawn_audio_uplink(
    mut consumer: CaptureConsumer,
    config: &ClientConfig,
    uplink: Arc<UplinkGate>,
    running: Arc<AtomicBool>,
    diagnostics: Arc<ClientDiagnostics>,
) -> JoinHandle<()> {
    let mode = config.mode;
    let capture_rate = config.capture_sample_rate;
    let uplink_rate = config.uplink_sample_rate;

    tokio::spawn(async move {
        let mut resampler = match resample::UplinkResampler::new(
            capture_rate,
            uplink_rate,
            DRAIN_CHUNK,
        ) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "audio uplink disabled — resampler init failed");
                return;
            }
        };

        let mut raw = vec![0f32; DRAIN_CHUNK];
        loop {
            // The loop survives stop/start cycles: while stopped it keeps
            // the ring fresh by discarding, and the client aborts the task
            // on drop.
            if !running.load(Ordering::Relaxed) {
                let _ = consumer.pop_slice(&mut raw);
                tokio::time::sleep(IDLE_SLEEP).await;
                continue;
            }

            let n = consumer.pop_slice(&mut raw);
            if n == 0 {
                tokio::time::sleep(IDLE_SLEEP).await;
                continue;
            }

            let converted = resampler.process(&raw[..n]);
            if converted.is_empty() {
                continue;
            }

            let pcm = pcm::f32_to_pcm16(&converted);
            let frame = wire::audio_frame(mode, pcm::pcm16_to_le_bytes(&pcm));
            match uplink.try_send(frame) {
                SendOutcome::Sent => diagnostics.bump_audio_frames_sent(),
                SendOutcome::Dropped => {
                    diagnostics.bump_audio_frames_dropped();
                    debug!("audio frame dropped — outbound queue full");
                }
                SendOutcome::Disconnected => {
                    diagnostics.bump_audio_frames_dropped();
                    trace!("audio frame dropped — no valid session");
                }
            }
        }
    })
}

/// Spawn the video uplink loop: one capture per fixed period, JPEG-encode,
/// gated lossy send.
pub(crate) fn spawn_video_uplink(
    mut source: Box<dyn VideoSource>,
    config: &ClientConfig,
    uplink: Arc<UplinkGate>,
    running: Arc<AtomicBool>,
    diagnostics: Arc<ClientDiagnostics>,
) -> JoinHandle<()> {
    let mode = config.mode;
    let period = config.video_interval;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }

            let frame = match source.capture_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    diagnostics.bump_video_capture_errors();
                    warn!(error = %e, "video capture failed");
                    continue;
                }
            };

            let jpeg = match encode_jpeg(&frame) {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    diagnostics.bump_video_capture_errors();
                    warn!(error = %e, "video encode failed");
                    continue;
                }
            };

            match uplink.try_send(wire::video_frame(mode, &jpeg)) {
                SendOutcome::Sent => diagnostics.bump_video_frames_sent(),
                SendOutcome::Dropped => {
                    diagnostics.bump_video_frames_dropped();
                    debug!("video frame dropped — outbound queue full");
                }
                SendOutcome::Disconnected => {
                    diagnostics.bump_video_frames_dropped();
                    trace!("video frame dropped — no valid session");
                }
            }
        }
        debug!("video uplink stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_ring_round_trips_samples() {
        let (producer, mut consumer) = create_capture_ring();
        let mut feed = AudioFeed::new(producer);
        let samples = vec![0.25f32; 480];
        assert_eq!(feed.push(&samples), 480);

        let mut out = vec![0f32; 480];
        assert_eq!(consumer.pop_slice(&mut out), 480);
        assert_eq!(out, samples);
    }

    #[test]
    fn encode_jpeg_produces_a_jpeg_header() {
        let frame = VideoFrame {
            rgb: vec![128; 16 * 16 * 3],
            width: 16,
            height: 16,
        };
        let jpeg = encode_jpeg(&frame).expect("encode should succeed");
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8], "missing JPEG SOI marker");
    }

    #[test]
    fn encode_jpeg_rejects_mismatched_dimensions() {
        let frame = VideoFrame {
            rgb: vec![0; 10],
            width: 16,
            height: 16,
        };
        assert!(encode_jpeg(&frame).is_err());
    }
}
