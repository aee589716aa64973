//! Sample format conversions and the base64 PCM payload codec.
//!
//! Outbound audio is normalized `f32` → little-endian `i16` → base64; inbound
//! audio takes the reverse path. Both directions are mono.

use crate::defaults::PCM16_SCALE;
use crate::error::{LiveError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Convert one normalized sample to 16-bit PCM.
///
/// Input is clamped to [-1.0, 1.0] first and the product saturates, so
/// `1.0 * 32768` lands on `i16::MAX` instead of wrapping to `i16::MIN`.
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    (clamped * PCM16_SCALE) as i16
}

/// Convert one 16-bit PCM sample to a normalized float.
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / PCM16_SCALE
}

/// Encode normalized samples as base64 little-endian 16-bit PCM.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&f32_to_i16(sample).to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decode a base64 little-endian 16-bit PCM payload into normalized samples.
///
/// # Errors
/// Returns `LiveError::AudioDecode` for invalid base64 or an odd byte count.
pub fn decode_pcm16_base64(data: &str) -> Result<Vec<f32>> {
    let bytes = BASE64.decode(data).map_err(|e| LiveError::AudioDecode {
        message: format!("invalid base64 payload: {}", e),
    })?;

    if bytes.len() % 2 != 0 {
        return Err(LiveError::AudioDecode {
            message: format!("PCM payload has odd length {}", bytes.len()),
        });
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Mix interleaved multi-channel audio down to mono by averaging channels.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample mono audio with linear interpolation.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}
