//! Sample-rate conversion between the capture rate and the uplink rate.
//!
//! The collaborator feeds audio at whatever rate its device captures
//! (commonly 48 kHz); the endpoint expects 16 kHz mono PCM. `UplinkResampler`
//! bridges that gap on the uplink task, where allocation is allowed. When
//! the rates already match it is a zero-copy passthrough and no rubato
//! session is created at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{Result, VigilError};

/// Converts f32 mono audio from the capture rate to the uplink rate.
pub struct UplinkResampler {
    /// `None` when capture rate == uplink rate (passthrough mode).
    inner: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls until a full rubato block exists.
    pending: Vec<f32>,
    /// Input frames rubato consumes per call.
    block: usize,
    /// Pre-allocated rubato output buffer, `[1][output_frames_max]`.
    scratch: Vec<Vec<f32>>,
}

impl UplinkResampler {
    /// # Parameters
    /// - `capture_rate`: rate of the incoming samples (Hz).
    /// - `uplink_rate`: rate the endpoint expects (Hz), normally 16 000.
    /// - `block`: input frame count per rubato call.
    pub fn new(capture_rate: u32, uplink_rate: u32, block: usize) -> Result<Self> {
        if capture_rate == uplink_rate {
            return Ok(Self {
                inner: None,
                pending: Vec::new(),
                block,
                scratch: Vec::new(),
            });
        }

        let ratio = uplink_rate as f64 / capture_rate as f64;
        let inner = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, block, 1)
            .map_err(|e| VigilError::Resample(format!("init: {e}")))?;

        let max_out = inner.output_frames_max();
        let scratch = vec![vec![0f32; max_out]; 1];

        tracing::info!(capture_rate, uplink_rate, block, "uplink resampling enabled");

        Ok(Self {
            inner: Some(inner),
            pending: Vec::new(),
            block,
            scratch,
        })
    }

    /// Feed samples, returning whatever converted output is ready.
    ///
    /// Input accumulates internally until a full block is available; the
    /// remainder carries over to the next call. Passthrough mode returns
    /// the input unchanged.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut inner) = self.inner else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= self.block {
            let input = &self.pending[..self.block];
            match inner.process_into_buffer(&[input], &mut self.scratch, None) {
                Ok((_consumed, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => tracing::error!(error = %e, "resampler process failed"),
            }
            self.pending.drain(..self.block);
        }
        out
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_returns_input_unchanged() {
        let mut rs = UplinkResampler::new(16_000, 16_000, 320).unwrap();
        assert!(rs.is_passthrough());
        let samples: Vec<f32> = (0..100).map(|i| i as f32 * 0.01).collect();
        assert_eq!(rs.process(&samples), samples);
    }

    #[test]
    fn downsamples_48k_to_16k_by_thirds() {
        let mut rs = UplinkResampler::new(48_000, 16_000, 960).unwrap();
        let out = rs.process(&vec![0.0f32; 960]);
        assert!(!out.is_empty());
        let expected = 320isize;
        assert!(
            (out.len() as isize - expected).unsigned_abs() <= 10,
            "len={} expected≈{expected}",
            out.len()
        );
    }

    #[test]
    fn partial_block_is_held_back() {
        let mut rs = UplinkResampler::new(48_000, 16_000, 960).unwrap();
        assert!(rs.process(&vec![0.0f32; 400]).is_empty());
        // Crossing the block boundary releases output.
        assert!(!rs.process(&vec![0.0f32; 600]).is_empty());
    }
}
