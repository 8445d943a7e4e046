//! 8 kHz → 16 kHz sample-rate conversion.
//!
//! A single pure function with no retained filter state: each call sees the
//! whole buffer it is given and nothing else. The STT path calls it once per
//! complete segment; the recorder and the streaming feed call it per chunk.
//! Stateful converters that carry filter history across calls are
//! off-limits in this pipeline.

/// Doubles the sample rate of 16-bit mono little-endian PCM by linear
/// interpolation.
///
/// For input samples `s[0..n]` the output is `2n` samples: every `s[i]`
/// followed by the midpoint of `s[i]` and `s[i+1]`; the final interpolated
/// sample repeats `s[n-1]`. Output byte length is exactly twice the input.
#[must_use]
pub fn upsample_2x(pcm: &[u8]) -> Vec<u8> {
    let n = pcm.len() / 2;
    let mut out = Vec::with_capacity(n * 4);

    for i in 0..n {
        let current = i16::from_le_bytes([pcm[i * 2], pcm[i * 2 + 1]]);
        let next = if i + 1 < n {
            i16::from_le_bytes([pcm[(i + 1) * 2], pcm[(i + 1) * 2 + 1]])
        } else {
            current
        };
        let midpoint = (((current as i32) + (next as i32)) / 2) as i16;

        out.extend_from_slice(&current.to_le_bytes());
        out.extend_from_slice(&midpoint.to_le_bytes());
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn to_samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn output_is_exactly_twice_the_input_length() {
        for n in [0usize, 1, 2, 160, 8000] {
            let input = vec![0u8; n * 2];
            assert_eq!(upsample_2x(&input).len(), input.len() * 2);
        }
    }

    #[test]
    fn original_samples_are_preserved_at_even_positions() {
        let input = [100i16, -200, 300, -32768, 32767];
        let out = to_samples(&upsample_2x(&to_bytes(&input)));
        for (i, s) in input.iter().enumerate() {
            assert_eq!(out[i * 2], *s);
        }
    }

    #[test]
    fn interpolated_samples_are_midpoints() {
        let input = [0i16, 100, -100];
        let out = to_samples(&upsample_2x(&to_bytes(&input)));
        assert_eq!(out, vec![0, 50, 100, 0, -100, -100]);
    }

    #[test]
    fn silence_stays_silence() {
        let out = upsample_2x(&vec![0u8; 320]);
        assert!(out.iter().all(|&b| b == 0));
        assert_eq!(out.len(), 640);
    }

    #[test]
    fn extreme_values_do_not_overflow() {
        let input = [i16::MAX, i16::MAX, i16::MIN, i16::MIN];
        let out = to_samples(&upsample_2x(&to_bytes(&input)));
        assert_eq!(out[0], i16::MAX);
        assert_eq!(out[1], i16::MAX);
        // Midpoint of MAX and MIN rounds toward zero.
        assert_eq!(out[3], 0);
        assert_eq!(out[4], i16::MIN);
    }

    #[test]
    fn sine_midpoints_track_the_waveform() {
        // 1 kHz sine at 8 kHz: 8 samples per cycle. Linear midpoints must
        // stay within the chord error of the sine at 16 kHz positions.
        let amplitude = 8000.0f64;
        let input: Vec<i16> = (0..80)
            .map(|i| {
                (amplitude * (2.0 * std::f64::consts::PI * 1000.0 * i as f64 / 8000.0).sin())
                    as i16
            })
            .collect();
        let out = to_samples(&upsample_2x(&to_bytes(&input)));

        for i in 0..input.len() - 1 {
            let expected = ((input[i] as i32 + input[i + 1] as i32) / 2) as i16;
            assert_eq!(out[i * 2 + 1], expected);
        }
    }
}
