//! Audio pipeline for the carrier <-> AI bridge
//!
//! The carrier leg speaks 8-bit µ-law at 8kHz; the AI service speaks 16-bit
//! linear PCM at 24kHz. This module provides:
//! - G.711 µ-law encode/decode (table-driven)
//! - Nearest-neighbor sample-rate conversion
//! - Base64 payload transport and 160-byte frame chunking

pub mod codec;
pub mod frame;
pub mod resample;

pub use codec::{decode, encode, linear_to_ulaw, ulaw_to_linear, ULAW_SILENCE};
pub use frame::{
    bytes_to_samples, chunk_payload, decode_payload, encode_payload, samples_to_bytes, AudioFrame,
    FrameDirection, SampleFormat, FRAME_BYTES, FRAME_DURATION_MS,
};
pub use resample::resample;

use thiserror::Error;

/// Sample rate of the carrier media stream.
pub const CARRIER_SAMPLE_RATE: u32 = 8000;

/// Sample rate expected by the AI service.
pub const AI_SAMPLE_RATE: u32 = 24000;

/// Audio transcoding errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Invalid payload: {0}")]
    Payload(String),
}

/// Transcode one inbound carrier frame (µ-law 8kHz) into the AI service's
/// format (linear PCM 24kHz, little-endian). Produces a new frame; the
/// input is never mutated.
pub fn carrier_to_ai(frame: &AudioFrame) -> AudioFrame {
    debug_assert_eq!(frame.format, SampleFormat::Companded8k);

    let linear = codec::decode(&frame.bytes);
    let upsampled = resample(&linear, CARRIER_SAMPLE_RATE, AI_SAMPLE_RATE);
    AudioFrame::new(
        frame::samples_to_bytes(&upsampled),
        SampleFormat::Linear24k,
        frame.direction,
    )
}

/// Transcode one AI audio delta (linear PCM 24kHz, little-endian) into
/// carrier format (µ-law 8kHz), not yet chunked.
pub fn ai_to_carrier(frame: &AudioFrame) -> AudioFrame {
    debug_assert_eq!(frame.format, SampleFormat::Linear24k);

    let linear = frame::bytes_to_samples(&frame.bytes);
    let downsampled = resample(&linear, AI_SAMPLE_RATE, CARRIER_SAMPLE_RATE);
    AudioFrame::new(
        codec::encode(&downsampled),
        SampleFormat::Companded8k,
        frame.direction,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(ulaw: Vec<u8>) -> AudioFrame {
        AudioFrame::new(ulaw, SampleFormat::Companded8k, FrameDirection::Inbound)
    }

    #[test]
    fn test_silence_survives_full_pipeline() {
        // 20 companded silence bytes -> linear -> 8k->24k -> 24k->8k ->
        // companded again must reproduce the silence code exactly.
        let silence = vec![ULAW_SILENCE; 20];

        let ai_frame = carrier_to_ai(&inbound(silence.clone()));
        assert_eq!(ai_frame.format, SampleFormat::Linear24k);
        assert_eq!(ai_frame.bytes.len(), 20 * 3 * 2); // 3x samples, 2 bytes each

        let back = ai_to_carrier(&AudioFrame::new(
            ai_frame.bytes.clone(),
            SampleFormat::Linear24k,
            FrameDirection::Outbound,
        ));
        assert_eq!(back.format, SampleFormat::Companded8k);
        assert_eq!(back.bytes.as_ref(), silence.as_slice());
    }

    #[test]
    fn test_carrier_to_ai_length() {
        // 160 µ-law bytes (20ms) -> 480 samples -> 960 bytes
        let frame = carrier_to_ai(&inbound(vec![ULAW_SILENCE; 160]));
        assert_eq!(frame.bytes.len(), 960);
        assert_eq!(frame.direction, FrameDirection::Inbound);
    }

    #[test]
    fn test_ai_to_carrier_length() {
        // 480 samples at 24kHz (20ms) -> 160 µ-law bytes
        let pcm = samples_to_bytes(&vec![0i16; 480]);
        let frame = ai_to_carrier(&AudioFrame::new(
            pcm,
            SampleFormat::Linear24k,
            FrameDirection::Outbound,
        ));
        assert_eq!(frame.bytes.len(), 160);
    }
}
