//! G.711 µ-law decoding and energy metering.
//!
//! The telephony provider delivers 8 kHz mono µ-law. Decoding is a pure
//! 256-entry table lookup; the table is expanded at compile time from the
//! standard G.711 formula. RMS over the decoded chunk is the energy proxy
//! consumed by the voice-activity detector.

use bytes::Bytes;

/// µ-law bias added during expansion (G.711).
const MULAW_BIAS: i16 = 0x84;

/// Expands one µ-law byte to a linear 16-bit sample (G.711).
const fn expand(byte: u8) -> i16 {
    let u = !byte;
    let sign = u & 0x80;
    let exponent = (u >> 4) & 0x07;
    let mantissa = (u & 0x0F) as i16;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Compile-time expansion table for all 256 µ-law values.
static MULAW_TABLE: [i16; 256] = {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = expand(i as u8);
        i += 1;
    }
    table
};

/// Decodes a µ-law payload to linear 16-bit samples.
///
/// Stateless and deterministic; input may be any length (typically 160
/// bytes / 20 ms).
#[must_use]
pub fn decode_mulaw(payload: &[u8]) -> Vec<i16> {
    payload.iter().map(|&b| MULAW_TABLE[b as usize]).collect()
}

/// Root-mean-square of signed 16-bit samples: `sqrt(mean(sample²))`.
///
/// Returns 0.0 for an empty chunk.
#[must_use]
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// Serializes samples to little-endian PCM bytes.
#[must_use]
pub fn samples_to_le_bytes(samples: &[i16]) -> Bytes {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference G.711 µ-law compression, used only to verify the table.
    fn compress(sample: i16) -> u8 {
        let sign: u8 = if sample < 0 { 0x80 } else { 0 };
        let mut magnitude = if sample < 0 {
            -(sample as i32)
        } else {
            sample as i32
        };
        if magnitude > 32_635 {
            magnitude = 32_635;
        }
        magnitude += MULAW_BIAS as i32;

        let mut exponent = 7u8;
        let mut mask = 0x4000;
        while exponent > 0 && (magnitude & mask) == 0 {
            exponent -= 1;
            mask >>= 1;
        }
        let mantissa = ((magnitude >> (exponent + 3)) & 0x0F) as u8;
        !(sign | (exponent << 4) | mantissa)
    }

    #[test]
    fn digital_silence_decodes_to_zero() {
        assert_eq!(MULAW_TABLE[0xFF], 0);
        let samples = decode_mulaw(&[0xFF; 160]);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn round_trip_at_the_quantization_grid() {
        // Every µ-law code must survive decode → encode unchanged, except
        // 0x7F (negative zero), which collapses onto positive zero 0xFF.
        for byte in 0u16..=255 {
            let byte = byte as u8;
            let sample = MULAW_TABLE[byte as usize];
            let expected = if byte == 0x7F { 0xFF } else { byte };
            assert_eq!(
                compress(sample),
                expected,
                "code {:#04x} decoded to {} which re-encoded differently",
                byte,
                sample
            );
        }
    }

    #[test]
    fn expansion_is_antisymmetric() {
        for code in 0u8..0x80 {
            // Flipping the sign bit (pre-complement) negates the sample.
            assert_eq!(MULAW_TABLE[code as usize], -MULAW_TABLE[(code | 0x80) as usize]);
        }
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[0; 160]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_constant_signal_is_its_magnitude() {
        assert!((rms(&[800; 160]) - 800.0).abs() < 1e-9);
        assert!((rms(&[-800; 160]) - 800.0).abs() < 1e-9);
    }

    #[test]
    fn le_bytes_round_trip() {
        let samples = [0i16, 1, -1, i16::MAX, i16::MIN];
        let bytes = samples_to_le_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);
        for (i, s) in samples.iter().enumerate() {
            let decoded = i16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]);
            assert_eq!(decoded, *s);
        }
    }
}
