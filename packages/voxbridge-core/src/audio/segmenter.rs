//! Energy-based speech segmentation.
//!
//! [`SpeechSegmenter`] accumulates 8 kHz PCM chunks into speech segments
//! suitable for transcription. It is a pure state machine: no I/O, no
//! clocks of its own (the caller supplies elapsed session time), which
//! keeps it deterministic under test.
//!
//! State machine per direction:
//! - **Idle**: chunks below the speech threshold are discarded. A chunk at
//!   or above it starts a segment.
//! - **Buffering**: chunks are appended. A silence run of `silence_hang`
//!   closes the segment (trailing silence trimmed); hitting
//!   `max_segment` closes it regardless of silence. Silence closure wins
//!   over the length cap within the same chunk, and at most one segment is
//!   emitted per chunk.
//! - **Closed**: terminal; no further chunks accepted.

use bytes::Bytes;

use crate::audio::{chunk_duration_secs, TELEPHONY_SAMPLE_RATE};
use crate::config::VadConfig;

/// Thresholds driving the segmenter, resolved from [`VadConfig`].
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    pub speech_start_rms: f64,
    pub silence_rms: f64,
    pub silence_hang_secs: f64,
    pub min_speech_secs: f64,
    pub max_segment_secs: f64,
    pub segment_reject_rms: f64,
    pub startup_guard_secs: f64,
}

impl From<&VadConfig> for SegmenterConfig {
    fn from(vad: &VadConfig) -> Self {
        Self {
            speech_start_rms: vad.speech_start_rms as f64,
            silence_rms: vad.effective_silence_rms() as f64,
            silence_hang_secs: vad.silence_hang_secs,
            min_speech_secs: vad.min_speech_secs,
            max_segment_secs: vad.max_segment_secs,
            segment_reject_rms: vad.segment_reject_rms as f64,
            startup_guard_secs: vad.startup_guard_secs,
        }
    }
}

/// Current segmenter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No speech in progress; low-energy chunks are discarded.
    Idle,
    /// Accumulating a speech segment.
    Buffering,
    /// Terminal; the direction has stopped.
    Closed,
}

/// An emitted speech segment, still at 8 kHz.
#[derive(Debug, Clone)]
pub struct PendingSegment {
    /// Monotonic per-direction sequence, starting at 0.
    pub sequence: u64,
    /// Seconds from session start to the first voiced chunk.
    pub start_offset: f64,
    /// Segment length in seconds of audio.
    pub duration: f64,
    /// Concatenated 8 kHz 16-bit mono PCM.
    pub pcm_8k: Vec<u8>,
    /// Average RMS across the whole segment.
    pub average_rms: f64,
}

/// Buffered chunk bookkeeping.
struct BufferedChunk {
    pcm: Bytes,
    rms: f64,
    samples: usize,
}

/// Accumulates PCM chunks and cuts segments at energy boundaries.
pub struct SpeechSegmenter {
    cfg: SegmenterConfig,
    state: SegmenterState,
    chunks: Vec<BufferedChunk>,
    buffered_samples: usize,
    /// Chunk count up to and including the last voiced chunk.
    voiced_len: usize,
    silence_run_secs: f64,
    start_offset: f64,
    next_sequence: u64,
}

impl SpeechSegmenter {
    /// Creates a segmenter in the Idle state.
    #[must_use]
    pub fn new(cfg: SegmenterConfig) -> Self {
        Self {
            cfg,
            state: SegmenterState::Idle,
            chunks: Vec::new(),
            buffered_samples: 0,
            voiced_len: 0,
            silence_run_secs: 0.0,
            start_offset: 0.0,
            next_sequence: 0,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Sequence number the next emitted segment will carry.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Feeds one decoded chunk.
    ///
    /// `elapsed_secs` is wall-clock time since session start. Returns a
    /// segment when this chunk completed one.
    pub fn push_chunk(
        &mut self,
        pcm: Bytes,
        rms: f64,
        elapsed_secs: f64,
    ) -> Option<PendingSegment> {
        if self.state == SegmenterState::Closed {
            return None;
        }

        // Startup guard: telephony connect clicks in the first instants of
        // the call are never speech.
        if elapsed_secs < self.cfg.startup_guard_secs {
            return None;
        }

        match self.state {
            SegmenterState::Idle => {
                if rms >= self.cfg.speech_start_rms {
                    self.state = SegmenterState::Buffering;
                    self.start_offset = elapsed_secs;
                    self.silence_run_secs = 0.0;
                    self.append(pcm, rms);
                }
                None
            }
            SegmenterState::Buffering => {
                let chunk_secs = chunk_duration_secs(pcm.len());
                self.append(pcm, rms);


                if rms < self.cfg.silence_rms {
                    self.silence_run_secs += chunk_secs;
                } else {
                    self.silence_run_secs = 0.0;
                }

                let buffered_secs =
                    self.buffered_samples as f64 / TELEPHONY_SAMPLE_RATE as f64;

                // Silence closure takes precedence over the length cap.
                if self.silence_run_secs >= self.cfg.silence_hang_secs {
                    return self.finish_segment(true);
                }
                if buffered_secs >= self.cfg.max_segment_secs {
                    return self.finish_segment(false);
                }
                None
            }
            SegmenterState::Closed => None,
        }
    }

    /// Finalizes any in-progress segment without closing the segmenter.
    ///
    /// Used on provider `stop`: a buffered segment at least
    /// `min_speech_secs` long is emitted; anything shorter is discarded.
    pub fn flush(&mut self) -> Option<PendingSegment> {
        if self.state != SegmenterState::Buffering {
            return None;
        }
        self.finish_segment(true)
    }

    /// Flushes and transitions to the terminal state.
    pub fn close(&mut self) -> Option<PendingSegment> {
        let pending = self.flush();
        self.state = SegmenterState::Closed;
        pending
    }

    fn append(&mut self, pcm: Bytes, rms: f64) {
        let samples = pcm.len() / 2;
        self.buffered_samples += samples;
        if rms >= self.cfg.silence_rms {
            self.voiced_len = self.chunks.len() + 1;
        }
        self.chunks.push(BufferedChunk { pcm, rms, samples });
    }

    /// Concatenates the buffer into a segment and resets to Idle.
    ///
    /// With `trim_trailing_silence` the silent tail that triggered the
    /// boundary is dropped, so the emitted duration covers speech only.
    fn finish_segment(&mut self, trim_trailing_silence: bool) -> Option<PendingSegment> {
        let keep = if trim_trailing_silence {
            self.voiced_len
        } else {
            self.chunks.len()
        };

        let chunks = std::mem::take(&mut self.chunks);
        self.buffered_samples = 0;
        self.voiced_len = 0;
        self.silence_run_secs = 0.0;
        self.state = SegmenterState::Idle;

        let kept = &chunks[..keep];
        let kept_samples: usize = kept.iter().map(|c| c.samples).sum();
        let duration = kept_samples as f64 / TELEPHONY_SAMPLE_RATE as f64;

        if kept_samples == 0 || duration < self.cfg.min_speech_secs {
            return None;
        }

        let sum_squares: f64 = kept.iter().map(|c| c.rms * c.rms * c.samples as f64).sum();
        let average_rms = (sum_squares / kept_samples as f64).sqrt();

        if self.cfg.segment_reject_rms > 0.0 && average_rms < self.cfg.segment_reject_rms {
            return None;
        }

        let mut pcm_8k = Vec::with_capacity(kept_samples * 2);
        for chunk in kept {
            pcm_8k.extend_from_slice(&chunk.pcm);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        Some(PendingSegment {
            sequence,
            start_offset: self.start_offset,
            duration,
            pcm_8k,
            average_rms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20 ms of constant-amplitude PCM at 8 kHz.
    fn chunk(amplitude: i16) -> Bytes {
        let mut out = Vec::with_capacity(320);
        for _ in 0..160 {
            out.extend_from_slice(&amplitude.to_le_bytes());
        }
        Bytes::from(out)
    }

    fn default_cfg() -> SegmenterConfig {
        SegmenterConfig::from(&VadConfig::default())
    }

    /// Drives `count` chunks of the given amplitude through the segmenter,
    /// starting at `elapsed`, returning emitted segments and the new clock.
    fn drive(
        seg: &mut SpeechSegmenter,
        amplitude: i16,
        count: usize,
        elapsed: &mut f64,
    ) -> Vec<PendingSegment> {
        let rms = amplitude.unsigned_abs() as f64;
        let mut emitted = Vec::new();
        for _ in 0..count {
            if let Some(s) = seg.push_chunk(chunk(amplitude), rms, *elapsed) {
                emitted.push(s);
            }
            *elapsed += 0.02;
        }
        emitted
    }

    #[test]
    fn silence_only_never_emits() {
        let mut seg = SpeechSegmenter::new(default_cfg());
        let mut t = 0.0;
        let emitted = drive(&mut seg, 0, 500, &mut t);
        assert!(emitted.is_empty());
        assert_eq!(seg.state(), SegmenterState::Idle);
        assert!(seg.close().is_none());
    }

    #[test]
    fn startup_guard_discards_early_speech() {
        let mut seg = SpeechSegmenter::new(default_cfg());
        // Loud chunks inside the 0.5 s guard window are dropped outright.
        for i in 0..10 {
            assert!(seg.push_chunk(chunk(800), 800.0, i as f64 * 0.02).is_none());
        }
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn clean_utterance_emits_one_trimmed_segment() {
        let mut seg = SpeechSegmenter::new(default_cfg());
        let mut t = 0.6;

        // 2.0 s of speech at RMS 800, then 1.5 s of silence.
        let mut emitted = drive(&mut seg, 800, 100, &mut t);
        emitted.extend(drive(&mut seg, 0, 75, &mut t));

        assert_eq!(emitted.len(), 1);
        let s = &emitted[0];
        assert_eq!(s.sequence, 0);
        assert!((s.start_offset - 0.6).abs() < 1e-9);
        // Trailing silence is trimmed: duration covers the speech only.
        assert!(s.duration >= 2.0 && s.duration <= 2.02, "got {}", s.duration);
        assert_eq!(s.pcm_8k.len(), 100 * 320);
        assert!((s.average_rms - 800.0).abs() < 1e-6);
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn max_duration_cut_then_remainder_on_close() {
        let mut seg = SpeechSegmenter::new(default_cfg());
        let mut t = 0.6;

        // 12 s of continuous speech: force-cut at exactly 10.0 s.
        let emitted = drive(&mut seg, 800, 600, &mut t);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].sequence, 0);
        assert!((emitted[0].duration - 10.0).abs() < 1e-9);

        // Closing mid-speech emits the ~2 s remainder.
        let tail = seg.close().expect("remainder should be emitted");
        assert_eq!(tail.sequence, 1);
        assert!((tail.duration - 2.0).abs() < 0.021);
        assert_eq!(seg.state(), SegmenterState::Closed);
    }

    #[test]
    fn close_discards_segment_below_minimum() {
        let mut seg = SpeechSegmenter::new(default_cfg());
        let mut t = 0.6;
        // 0.2 s of speech, then stop.
        drive(&mut seg, 800, 10, &mut t);
        assert!(seg.close().is_none());
    }

    #[test]
    fn short_blip_followed_by_silence_is_discarded() {
        let mut seg = SpeechSegmenter::new(default_cfg());
        let mut t = 0.6;
        // 0.2 s of speech then enough silence to trigger the boundary.
        drive(&mut seg, 800, 10, &mut t);
        let emitted = drive(&mut seg, 0, 60, &mut t);
        assert!(emitted.is_empty());
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn sequences_are_gap_free_across_segments() {
        let mut seg = SpeechSegmenter::new(default_cfg());
        let mut t = 0.6;
        let mut all = Vec::new();

        for _ in 0..4 {
            all.extend(drive(&mut seg, 800, 50, &mut t)); // 1 s speech
            all.extend(drive(&mut seg, 0, 60, &mut t)); // 1.2 s silence
        }

        let sequences: Vec<u64> = all.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
    }

    #[test]
    fn segment_reject_rms_discards_quiet_segments() {
        let cfg = SegmenterConfig {
            segment_reject_rms: 500.0,
            ..default_cfg()
        };
        let mut seg = SpeechSegmenter::new(cfg);
        let mut t = 0.6;

        // Loud enough to start (RMS 50 >= 10) but below the reject bar.
        drive(&mut seg, 50, 100, &mut t);
        let emitted = drive(&mut seg, 0, 60, &mut t);
        assert!(emitted.is_empty());

        // A genuinely loud segment still passes, and takes sequence 0:
        // rejected segments do not consume sequence numbers.
        drive(&mut seg, 800, 100, &mut t);
        let emitted = drive(&mut seg, 0, 60, &mut t);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].sequence, 0);
    }

    #[test]
    fn speech_resumes_before_hang_keeps_one_segment() {
        let mut seg = SpeechSegmenter::new(default_cfg());
        let mut t = 0.6;

        drive(&mut seg, 800, 50, &mut t); // 1 s speech
        drive(&mut seg, 0, 40, &mut t); // 0.8 s pause — under the hang
        drive(&mut seg, 800, 50, &mut t); // 1 s speech
        let emitted = drive(&mut seg, 0, 60, &mut t); // 1.2 s silence

        assert_eq!(emitted.len(), 1);
        // Pause is inside the segment; only the trailing silence is trimmed.
        assert!((emitted[0].duration - 2.8).abs() < 1e-9);
    }

    #[test]
    fn closed_segmenter_ignores_chunks() {
        let mut seg = SpeechSegmenter::new(default_cfg());
        seg.close();
        assert!(seg.push_chunk(chunk(800), 800.0, 5.0).is_none());
        assert_eq!(seg.state(), SegmenterState::Closed);
    }
}
