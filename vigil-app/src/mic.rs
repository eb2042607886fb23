//! Microphone acquisition via cpal.
//!
//! The input callback runs on an OS audio thread at elevated priority, so
//! it only mixes down to mono in a reused scratch buffer and pushes into
//! two lock-free rings: the client's uplink feed and the local segment
//! ring for evidence recording. No blocking, no I/O.
//!
//! `cpal::Stream` is `!Send` on Windows/macOS; `MicCapture` must be
//! created and dropped on the same OS thread (main.rs keeps a dedicated
//! thread alive for it).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use ringbuf::traits::Producer;
use tracing::{info, warn};

use vigil_core::media::AudioFeed;

/// Producer half of the app-side segment ring.
pub type SegmentProducer = ringbuf::HeapProd<f32>;

/// Handle to an active capture stream. Dropping it releases the device.
pub struct MicCapture {
    _stream: Stream,
    pub sample_rate: u32,
}

/// Resolve the input device: preferred name, then system default, then
/// first available.
fn select_device(preferred: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(name) = preferred {
        if let Ok(mut devices) = host.input_devices() {
            if let Some(device) =
                devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
            {
                return Ok(device);
            }
        }
        warn!(device = name, "preferred input device not found, falling back");
    }

    if let Some(device) = host.default_input_device() {
        return Ok(device);
    }
    host.input_devices()
        .context("listing input devices")?
        .next()
        .ok_or_else(|| anyhow!("no input device available"))
}

/// Query the capture rate without opening a stream, so the client config
/// can be built before capture starts.
pub fn probe_input_rate(preferred: Option<&str>) -> Result<u32> {
    let device = select_device(preferred)?;
    let config = device
        .default_input_config()
        .context("querying default input config")?;
    Ok(config.sample_rate().0)
}

impl MicCapture {
    /// Open the microphone and start pushing mono f32 frames into both
    /// rings. Must be called from the thread that will drop the capture.
    pub fn open(
        preferred: Option<&str>,
        mut feed: AudioFeed,
        mut segments: SegmentProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let device = select_device(preferred)?;
        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .context("querying default input config")?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        info!(sample_rate, channels, "audio capture config selected");

        let config = StreamConfig {
            channels: channels as u16,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = |err| warn!(error = %err, "audio stream error");

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut mono: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        mix_to_mono(data, channels, &mut mono, |s| s);
                        feed.push(&mono);
                        let _ = segments.push_slice(&mono);
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let mut mono: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }
                        mix_to_mono(data, channels, &mut mono, |s| s as f32 / 32768.0);
                        feed.push(&mono);
                        let _ = segments.push_slice(&mono);
                    },
                    err_fn,
                    None,
                )
            }
            other => bail!("unsupported input sample format: {other:?}"),
        }
        .context("building input stream")?;

        stream.play().context("starting input stream")?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }
}

/// Interleaved frames → mono f32, averaging channels into `out`.
fn mix_to_mono<T: Copy>(data: &[T], channels: usize, out: &mut Vec<f32>, to_f32: impl Fn(T) -> f32) {
    let frames = data.len() / channels.max(1);
    out.resize(frames, 0.0);
    if channels <= 1 {
        for (slot, sample) in out.iter_mut().zip(data.iter()) {
            *slot = to_f32(*sample);
        }
        return;
    }
    for (frame, slot) in out.iter_mut().enumerate() {
        let base = frame * channels;
        let mut sum = 0f32;
        for ch in 0..channels {
            sum += to_f32(data[base + ch]);
        }
        *slot = sum / channels as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_passthrough() {
        let mut out = Vec::new();
        mix_to_mono(&[0.1f32, 0.2, 0.3], 1, &mut out, |s| s);
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn stereo_averages_channels() {
        let mut out = Vec::new();
        mix_to_mono(&[1.0f32, 0.0, 0.5, 0.5], 2, &mut out, |s| s);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn i16_conversion_normalizes() {
        let mut out = Vec::new();
        mix_to_mono(&[-32768i16, 16384], 1, &mut out, |s| s as f32 / 32768.0);
        assert_eq!(out, vec![-1.0, 0.5]);
    }
}
