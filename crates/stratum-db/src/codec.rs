//! Binary encodings for stored buffers.
//!
//! Quadrant slices are stored as raw little-endian `f32` values in the
//! dense layer's channel-interleaved order. Base distance samples are stored
//! as little-endian `i16` after scaling by [`BASE_SCALE`] (metres to
//! millimetres) and clamping to `±BASE_LIMIT`.

use crate::error::DbError;

/// Scale applied to distances before Int16 quantization.
pub const BASE_SCALE: f32 = 1000.0;

/// Largest magnitude a quantized distance sample may take.
pub const BASE_LIMIT: i16 = 32767;

/// Bytes per stored `f32`.
const F32_BYTES: usize = 4;

/// Bytes per stored `i16`.
const I16_BYTES: usize = 2;

/// Encode a field buffer as little-endian `f32` bytes.
pub fn encode_f32s(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len().saturating_mul(F32_BYTES));
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode little-endian `f32` bytes back into a field buffer.
///
/// # Errors
///
/// Returns [`DbError::Codec`] if the length is not a multiple of four.
pub fn decode_f32s(bytes: &[u8]) -> Result<Vec<f32>, DbError> {
    let chunks = bytes.chunks_exact(F32_BYTES);
    if !chunks.remainder().is_empty() {
        return Err(DbError::Codec(format!(
            "f32 buffer length {} is not a multiple of {F32_BYTES}",
            bytes.len()
        )));
    }
    chunks
        .map(|c| <[u8; F32_BYTES]>::try_from(c).map(f32::from_le_bytes))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DbError::Codec(e.to_string()))
}

/// Quantize one distance sample to Int16 millimetres.
///
/// Non-finite input quantizes to zero.
#[allow(clippy::cast_possible_truncation)]
pub fn quantize_distance(distance: f32) -> i16 {
    if !distance.is_finite() {
        return 0;
    }
    let limit = f32::from(BASE_LIMIT);
    // Clamped into i16 range before the cast.
    (distance * BASE_SCALE).round().clamp(-limit, limit) as i16
}

/// Recover a distance (metres) from a quantized sample.
pub fn dequantize_distance(sample: i16) -> f32 {
    f32::from(sample) / BASE_SCALE
}

/// Encode a layer's distance samples for the `base` substore.
pub fn encode_base_samples(distances: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(distances.len().saturating_mul(I16_BYTES));
    for d in distances {
        out.extend_from_slice(&quantize_distance(*d).to_le_bytes());
    }
    out
}

/// Decode a layer's distance samples from the `base` substore.
///
/// # Errors
///
/// Returns [`DbError::Codec`] if the length is odd.
pub fn decode_base_samples(bytes: &[u8]) -> Result<Vec<f32>, DbError> {
    let chunks = bytes.chunks_exact(I16_BYTES);
    if !chunks.remainder().is_empty() {
        return Err(DbError::Codec(format!(
            "base sample buffer length {} is not a multiple of {I16_BYTES}",
            bytes.len()
        )));
    }
    chunks
        .map(|c| {
            <[u8; I16_BYTES]>::try_from(c).map(|b| dequantize_distance(i16::from_le_bytes(b)))
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DbError::Codec(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn f32_buffers_survive_storage() {
        let values = [0.0_f32, -1.5, 3.25, f32::MAX];
        let bytes = encode_f32s(&values);
        assert_eq!(bytes.len(), 16);
        assert_eq!(decode_f32s(&bytes).unwrap(), values.to_vec());
    }

    #[test]
    fn f32_decode_rejects_ragged_length() {
        assert!(matches!(decode_f32s(&[0, 0, 0]), Err(DbError::Codec(_))));
        assert!(decode_f32s(&[]).unwrap().is_empty());
    }

    #[test]
    fn distances_quantize_to_millimetres() {
        assert_eq!(quantize_distance(1.2346), 1235);
        assert_eq!(quantize_distance(-0.0004), 0);
        assert_eq!(quantize_distance(-2.0), -2000);
        assert_eq!(quantize_distance(f32::NAN), 0);
    }

    #[test]
    fn distances_clamp_to_int16_limit() {
        assert_eq!(quantize_distance(40.0), 32767);
        assert_eq!(quantize_distance(-40.0), -32767);
        assert_eq!(quantize_distance(f32::INFINITY), 0);
    }

    #[test]
    fn base_samples_round_trip_within_a_millimetre() {
        let distances = [0.5_f32, -0.25, 12.0, 100.0];
        let bytes = encode_base_samples(&distances);
        assert_eq!(bytes.len(), 8);
        let decoded = decode_base_samples(&bytes).unwrap();
        assert!((decoded[0] - 0.5).abs() < 1e-3);
        assert!((decoded[1] + 0.25).abs() < 1e-3);
        assert!((decoded[2] - 12.0).abs() < 1e-3);
        // Saturated at 32.767 m.
        assert!((decoded[3] - 32.767).abs() < 1e-3);
        assert!(decode_base_samples(&[1]).is_err());
    }
}
