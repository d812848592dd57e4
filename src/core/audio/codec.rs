//! Wire audio codec: base64 ⇄ little-endian PCM16 ⇄ f32 samples.
//!
//! Protocol audio payloads are base64-encoded 16-bit signed little-endian PCM.
//! Normalization is asymmetric: negative samples divide by 32768, positive by
//! 32767, so both endpoints of the [-1, 1] range are reachable. Encoding is the
//! exact inverse with clamping and round-to-nearest, which makes
//! `encode(decode(payload))` bit-exact for already-quantized input.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

/// Audio payload decode failure. The only failure mode is malformed base64;
/// an odd trailing byte is ignored rather than rejected.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload was not valid base64
    #[error("invalid base64 audio payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Convert one PCM16 sample to a float in [-1, 1].
#[inline]
pub fn pcm16_to_f32(sample: i16) -> f32 {
    if sample < 0 {
        f32::from(sample) / 32768.0
    } else {
        f32::from(sample) / 32767.0
    }
}

/// Quantize one float sample to PCM16, clamping to [-1, 1] first.
#[inline]
pub fn f32_to_pcm16(sample: f32) -> i16 {
    let clamped = f64::from(sample).clamp(-1.0, 1.0);
    // f64 math keeps the inverse scaling exact enough that round-to-nearest
    // reproduces the original integer for quantized input.
    let scaled = if clamped < 0.0 {
        clamped * 32768.0
    } else {
        clamped * 32767.0
    };
    scaled.round() as i16
}

/// Decode a base64 PCM16 payload into float samples in [-1, 1].
///
/// Bytes are consumed in little-endian pairs; a trailing odd byte is dropped.
pub fn decode_audio(payload: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = BASE64.decode(payload)?;
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| pcm16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();
    Ok(samples)
}

/// Encode float samples as a base64 little-endian PCM16 payload.
pub fn encode_audio(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&f32_to_pcm16(sample).to_le_bytes());
    }
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_normalizes_asymmetrically() {
        let bytes: Vec<u8> = [i16::MIN, -16384, 0, 16384, i16::MAX]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let payload = BASE64.encode(&bytes);
        let samples = decode_audio(&payload).unwrap();
        assert_eq!(samples[0], -1.0);
        assert_eq!(samples[1], -0.5);
        assert_eq!(samples[2], 0.0);
        assert!((samples[3] - 16384.0 / 32767.0).abs() < 1e-7);
        assert_eq!(samples[4], 1.0);
    }

    #[test]
    fn encode_clamps_out_of_range_input() {
        assert_eq!(f32_to_pcm16(2.0), i16::MAX);
        assert_eq!(f32_to_pcm16(-3.5), i16::MIN);
        assert_eq!(f32_to_pcm16(0.0), 0);
    }

    #[test]
    fn encode_then_decode_round_trips_quantized_input() {
        // Every PCM16 value must survive decode → encode → decode unchanged.
        for raw in [i16::MIN, -32767, -12345, -1, 0, 1, 777, 32766, i16::MAX] {
            let sample = pcm16_to_f32(raw);
            assert_eq!(f32_to_pcm16(sample), raw, "sample {raw} did not round-trip");
        }
    }

    #[test]
    fn full_buffer_round_trip() {
        let original: Vec<f32> = (-50..50).map(|s| pcm16_to_f32(s * 300)).collect();
        let decoded = decode_audio(&encode_audio(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn malformed_base64_is_an_error() {
        assert!(decode_audio("not@base64!").is_err());
    }

    #[test]
    fn trailing_odd_byte_is_ignored() {
        let payload = BASE64.encode([0x00, 0x40, 0x7f]);
        let samples = decode_audio(&payload).unwrap();
        assert_eq!(samples.len(), 1);
    }
}
