//! f32 → PCM16 sample conversion for the uplink.

/// Convert mono f32 samples in [-1.0, 1.0] to signed 16-bit PCM.
///
/// Each sample is clamped before scaling so out-of-range input saturates
/// instead of wrapping: non-negative values scale by 32767, negative values
/// by 32768, rounded to the nearest integer.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let clamped = s.clamp(-1.0, 1.0);
            if clamped >= 0.0 {
                (clamped * 32767.0).round() as i16
            } else {
                (clamped * 32768.0).round() as i16
            }
        })
        .collect()
}

/// Serialize PCM16 samples as little-endian bytes for the wire.
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}
