//! Audio primitives shared across the pipeline.
//!
//! Everything in the hot path is 16-bit signed little-endian mono PCM.
//! The telephony leg arrives as µ-law at 8 kHz ([`mulaw`]), segments are
//! cut by energy ([`segmenter`]), upsampled once to 16 kHz ([`resample`])
//! and written to paired WAV files ([`recorder`]).

pub mod mulaw;
pub mod recorder;
pub mod resample;
pub mod segmenter;
pub mod wav;

pub use mulaw::{decode_mulaw, rms, samples_to_le_bytes};
pub use recorder::RecordingPair;
pub use resample::upsample_2x;
pub use segmenter::{PendingSegment, SegmenterConfig, SegmenterState, SpeechSegmenter};
pub use wav::wav_container;

/// Sample rate of the telephony leg (Hz).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Sample rate fed to speech-to-text providers (Hz).
pub const TRANSCRIBE_SAMPLE_RATE: u32 = 16_000;

/// Bytes per 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// PCM audio format description (always 16-bit here).
///
/// Used for WAV header generation and duration math.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Creates a new audio format configuration.
    #[must_use]
    pub const fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// Mono 16-bit at the given rate (the only shape this pipeline carries).
    #[must_use]
    pub const fn mono_16bit(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1, 16)
    }

    /// Returns bytes per sample (2 for 16-bit audio).
    #[inline]
    #[must_use]
    pub const fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Byte rate of a continuous stream in this format.
    #[inline]
    #[must_use]
    pub const fn byte_rate(&self) -> u32 {
        self.sample_rate * self.channels as u32 * (self.bits_per_sample / 8) as u32
    }

    /// Duration in seconds of a PCM byte buffer in this format.
    #[inline]
    #[must_use]
    pub fn duration_secs(&self, byte_len: usize) -> f64 {
        byte_len as f64 / self.byte_rate() as f64
    }

    /// Equivalent `hound` spec for file writing.
    #[must_use]
    pub fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: self.bits_per_sample,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

/// Duration in seconds of a mono 16-bit PCM byte buffer at 8 kHz.
#[inline]
#[must_use]
pub fn chunk_duration_secs(byte_len: usize) -> f64 {
    AudioFormat::mono_16bit(TELEPHONY_SAMPLE_RATE).duration_secs(byte_len)
}
