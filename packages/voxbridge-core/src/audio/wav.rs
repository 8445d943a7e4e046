//! In-memory WAV container for batch STT uploads.

use bytes::{BufMut, Bytes, BytesMut};

use crate::audio::AudioFormat;

/// Size of the canonical RIFF/fmt/data header.
const WAV_HEADER_LEN: usize = 44;

/// Wraps raw PCM in a standard 44-byte RIFF WAVE container.
///
/// Unlike a streaming header, the RIFF and `data` chunk sizes are the real
/// byte counts, so the result is a complete standalone file suitable for a
/// provider upload.
#[must_use]
pub fn wav_container(pcm: &[u8], format: AudioFormat) -> Bytes {
    let mut out = BytesMut::with_capacity(WAV_HEADER_LEN + pcm.len());

    let byte_rate = format.byte_rate();
    let block_align = format.channels * (format.bits_per_sample / 8);

    // RIFF header
    out.put_slice(b"RIFF");
    out.put_u32_le((36 + pcm.len()) as u32);
    out.put_slice(b"WAVE");

    // fmt chunk
    out.put_slice(b"fmt ");
    out.put_u32_le(16); // Chunk size
    out.put_u16_le(1); // Audio format (PCM)
    out.put_u16_le(format.channels);
    out.put_u32_le(format.sample_rate);
    out.put_u32_le(byte_rate);
    out.put_u16_le(block_align);
    out.put_u16_le(format.bits_per_sample);

    // data chunk
    out.put_slice(b"data");
    out.put_u32_le(pcm.len() as u32);
    out.put_slice(pcm);

    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TRANSCRIBE_SAMPLE_RATE;

    fn u32_at(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
    }

    fn u16_at(buf: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([buf[offset], buf[offset + 1]])
    }

    #[test]
    fn header_magic_and_sizes_are_correct() {
        let pcm = vec![0u8; 3200];
        let wav = wav_container(&pcm, AudioFormat::mono_16bit(TRANSCRIBE_SAMPLE_RATE));

        assert_eq!(wav.len(), 44 + 3200);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32_at(&wav, 4), 36 + 3200);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32_at(&wav, 40), 3200);
    }

    #[test]
    fn fmt_chunk_advertises_mono_16bit_pcm() {
        let wav = wav_container(&[0u8; 320], AudioFormat::mono_16bit(TRANSCRIBE_SAMPLE_RATE));

        assert_eq!(u16_at(&wav, 20), 1); // PCM
        assert_eq!(u16_at(&wav, 22), 1); // mono
        assert_eq!(u32_at(&wav, 24), 16_000); // sample rate
        assert_eq!(u32_at(&wav, 28), 32_000); // byte rate
        assert_eq!(u16_at(&wav, 32), 2); // block align
        assert_eq!(u16_at(&wav, 34), 16); // bit depth
    }

    #[test]
    fn payload_follows_header_verbatim() {
        let pcm: Vec<u8> = (0u8..=255).collect();
        let wav = wav_container(&pcm, AudioFormat::mono_16bit(8_000));
        assert_eq!(&wav[44..], pcm.as_slice());
    }
}
