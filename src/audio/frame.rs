//! Frame transport helpers
//!
//! Base64 payload transport and fixed-size chunking of PCM byte streams
//! into wire-sized frames. The carrier plays one 160-byte µ-law frame per
//! 20ms, so every outbound payload is split to that size before pacing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;

use super::AudioError;

/// Carrier wire frame size: 160 µ-law bytes = 20ms at 8kHz.
pub const FRAME_BYTES: usize = 160;

/// Duration of one carrier frame.
pub const FRAME_DURATION_MS: u64 = 20;

/// Sample format of an audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 8-bit µ-law companded samples at 8kHz (carrier native)
    Companded8k,
    /// 16-bit linear PCM samples at 24kHz (AI service native)
    Linear24k,
}

/// Direction of an audio frame relative to this bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Carrier -> AI service
    Inbound,
    /// AI service -> carrier
    Outbound,
}

/// A transient audio buffer tagged with its format and direction.
///
/// Frames are immutable once produced; conversions always produce a new
/// frame rather than mutating in place.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub bytes: Bytes,
    pub format: SampleFormat,
    pub direction: FrameDirection,
}

impl AudioFrame {
    pub fn new(bytes: impl Into<Bytes>, format: SampleFormat, direction: FrameDirection) -> Self {
        Self {
            bytes: bytes.into(),
            format,
            direction,
        }
    }
}

/// Base64-encode a payload for a JSON envelope.
pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 payload from a JSON envelope.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, AudioError> {
    BASE64
        .decode(payload)
        .map_err(|e| AudioError::Payload(e.to_string()))
}

/// Split a byte buffer into wire-sized chunks.
///
/// Yields `ceil(len / size)` chunks; every chunk except possibly the last
/// is exactly `size` bytes. An empty buffer yields no chunks.
pub fn chunk_payload(bytes: &[u8], size: usize) -> Vec<Vec<u8>> {
    bytes.chunks(size).map(|c| c.to_vec()).collect()
}

/// Convert 16-bit samples to little-endian PCM bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Convert little-endian PCM bytes to 16-bit samples.
///
/// A trailing odd byte is dropped; the AI service always sends whole
/// samples, so this only trims corruption rather than inventing audio.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_counts() {
        for n in [0usize, 1, 159, 160, 161, 320, 480, 1000] {
            let buf = vec![0xAAu8; n];
            let chunks = chunk_payload(&buf, FRAME_BYTES);
            assert_eq!(chunks.len(), n.div_ceil(FRAME_BYTES), "n = {}", n);

            for (i, chunk) in chunks.iter().enumerate() {
                if i + 1 < chunks.len() {
                    assert_eq!(chunk.len(), FRAME_BYTES);
                } else {
                    assert!(chunk.len() <= FRAME_BYTES && !chunk.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_chunks_reassemble() {
        let buf: Vec<u8> = (0u8..=255).cycle().take(500).collect();
        let rejoined: Vec<u8> = chunk_payload(&buf, FRAME_BYTES).concat();
        assert_eq!(rejoined, buf);
    }

    #[test]
    fn test_base64_roundtrip() {
        let payload = vec![0u8, 1, 2, 0xFF, 0x7F, 128];
        let encoded = encode_payload(&payload);
        assert_eq!(decode_payload(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_payload("not base64!!").is_err());
    }

    #[test]
    fn test_sample_byte_roundtrip() {
        let samples = vec![0i16, 1, -1, i16::MAX, i16::MIN, 1234];
        let bytes = samples_to_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);
        assert_eq!(bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn test_odd_trailing_byte_dropped() {
        let mut bytes = samples_to_bytes(&[100i16, 200]);
        bytes.push(0x7F);
        assert_eq!(bytes_to_samples(&bytes), vec![100, 200]);
    }
}
