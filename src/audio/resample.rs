//! Sample-rate conversion between the carrier's 8kHz stream and the AI
//! service's 24kHz stream.
//!
//! Nearest-neighbor only: each output sample copies the input sample at
//! `floor(i * from/to)`. No interpolation and no anti-aliasing filter, so
//! some aliasing is audible, but no extra buffering is introduced and the
//! per-frame latency stays at zero. For conversational speech at these
//! rates that tradeoff is intentional; replacing it requires an explicit
//! higher-quality resampler, not a tweak here.

/// Resample `samples` from `from_hz` to `to_hz`.
///
/// Output length is exactly `floor(len * to_hz / from_hz)`. Out-of-range
/// source indexes clamp to the last input sample; an empty input yields an
/// empty output.
pub fn resample(samples: &[i16], from_hz: u32, to_hz: u32) -> Vec<i16> {
    if samples.is_empty() || from_hz == 0 || to_hz == 0 {
        return Vec::new();
    }

    if from_hz == to_hz {
        return samples.to_vec();
    }

    let out_len = (samples.len() as u64 * to_hz as u64 / from_hz as u64) as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src = (i as u64 * from_hz as u64 / to_hz as u64) as usize;
        out.push(samples[src.min(samples.len() - 1)]);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_length() {
        // floor(len * to/from) for a spread of rates and lengths
        let cases = [
            (160usize, 8000u32, 24000u32, 480usize),
            (480, 24000, 8000, 160),
            (100, 8000, 8000, 100),
            (7, 8000, 24000, 21),
            (7, 24000, 8000, 2),
            (1, 8000, 24000, 3),
        ];

        for (len, from, to, expected) in cases {
            let input = vec![0i16; len];
            assert_eq!(
                resample(&input, from, to).len(),
                expected,
                "len {} {}->{}",
                len,
                from,
                to
            );
        }
    }

    #[test]
    fn test_upsample_repeats_neighbors() {
        let input = vec![10i16, 20, 30];
        let out = resample(&input, 8000, 24000);
        assert_eq!(out, vec![10, 10, 10, 20, 20, 20, 30, 30, 30]);
    }

    #[test]
    fn test_downsample_picks_every_third() {
        let input: Vec<i16> = (0..12).collect();
        let out = resample(&input, 24000, 8000);
        assert_eq!(out, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_up_then_down_is_identity() {
        let input: Vec<i16> = (0..160).map(|i| (i * 13 % 251) as i16).collect();
        let up = resample(&input, 8000, 24000);
        let back = resample(&up, 24000, 8000);
        assert_eq!(back, input);
    }

    #[test]
    fn test_empty_input() {
        assert!(resample(&[], 8000, 24000).is_empty());
    }
}
