//! Evidence segmenter: slices the capture stream into ~1 s PCM16 blocks
//! and hands them to the client's evidence ring at a fixed cadence.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use ringbuf::traits::Consumer;
use tokio::task::JoinHandle;
use tracing::debug;

use vigil_core::media::pcm;
use vigil_core::VigilClient;

/// Consumer half of the app-side segment ring.
pub type SegmentConsumer = ringbuf::HeapCons<f32>;

/// Segment ring capacity: 2^19 f32 samples ≈ 10.9 s at 48 kHz.
pub const SEGMENT_RING_CAPACITY: usize = 1 << 19;

/// How often the segmenter drains the ring.
const DRAIN_PERIOD: Duration = Duration::from_millis(250);

pub fn create_segment_ring() -> (crate::mic::SegmentProducer, SegmentConsumer) {
    use ringbuf::{traits::Split, HeapRb};
    HeapRb::<f32>::new(SEGMENT_RING_CAPACITY).split()
}

/// Spawn the segmenter task. Each accumulated second of audio becomes one
/// PCM16 segment pushed to the client.
pub fn spawn_segmenter(
    client: Arc<VigilClient>,
    mut consumer: SegmentConsumer,
    sample_rate: u32,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let segment_samples = sample_rate as usize;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DRAIN_PERIOD);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut scratch = vec![0f32; 4096];
        let mut pending: Vec<f32> = Vec::with_capacity(segment_samples * 2);

        while running.load(Ordering::Relaxed) {
            ticker.tick().await;

            loop {
                let n = consumer.pop_slice(&mut scratch);
                if n == 0 {
                    break;
                }
                pending.extend_from_slice(&scratch[..n]);
            }

            while pending.len() >= segment_samples {
                let second: Vec<f32> = pending.drain(..segment_samples).collect();
                let bytes = pcm::pcm16_to_le_bytes(&pcm::f32_to_pcm16(&second));
                debug!(bytes = bytes.len(), "evidence segment ready");
                client.push_segment(bytes);
            }
        }
    })
}
