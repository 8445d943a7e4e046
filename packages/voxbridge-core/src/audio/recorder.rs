//! Paired WAV recording for a session direction.
//!
//! Two writers per direction: the raw 8 kHz telephony audio and its 16 kHz
//! upsampled twin. Every decoded chunk is written, so the files cover the
//! entire call including silence the VAD never turns into segments.
//! Recording failures are logged and suppressed; they never take down the
//! session.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hound::WavWriter;

use crate::audio::{AudioFormat, TELEPHONY_SAMPLE_RATE, TRANSCRIBE_SAMPLE_RATE};
use crate::error::{BridgeError, BridgeResult};
use crate::transcript::SpeakerRole;

type FileWriter = WavWriter<BufWriter<File>>;

/// One WAV output file; disabled after the first write failure.
struct RecordingFile {
    writer: Option<FileWriter>,
    path: PathBuf,
    samples_written: u64,
    sample_rate: u32,
}

impl RecordingFile {
    fn create(path: PathBuf, sample_rate: u32) -> BridgeResult<Self> {
        let spec = AudioFormat::mono_16bit(sample_rate).wav_spec();
        let writer = WavWriter::create(&path, spec).map_err(|e| {
            BridgeError::Recording(format!("Failed to create {}: {}", path.display(), e))
        })?;
        Ok(Self {
            writer: Some(writer),
            path,
            samples_written: 0,
            sample_rate,
        })
    }

    /// Writes little-endian PCM bytes; on error the file is abandoned.
    fn write(&mut self, pcm: &[u8]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        for sample in pcm.chunks_exact(2) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            if let Err(e) = writer.write_sample(value) {
                log::warn!(
                    "[Recorder] Write failed for {}, abandoning file: {}",
                    self.path.display(),
                    e
                );
                self.writer = None;
                return;
            }
            self.samples_written += 1;
        }
    }

    fn finalize(mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        let duration_secs = self.samples_written as f64 / self.sample_rate as f64;
        match writer.finalize() {
            Ok(()) => log::info!(
                "[Recorder] Closed {} ({} samples, {:.2}s)",
                self.path.display(),
                self.samples_written,
                duration_secs
            ),
            Err(e) => log::warn!(
                "[Recorder] Failed to finalize {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Paired 8 kHz + 16 kHz writers for one session direction.
pub struct RecordingPair {
    file_8k: RecordingFile,
    file_16k: RecordingFile,
    chunks_written: u64,
}

impl RecordingPair {
    /// Creates both files in `dir` using the session start timestamp.
    ///
    /// Filenames follow `<speaker>_<session>_<YYYYMMDD_HHMMSS>_<rate>Hz.wav`.
    pub fn create(
        dir: &Path,
        role: SpeakerRole,
        session_id: &str,
        started_at: DateTime<Utc>,
    ) -> BridgeResult<Self> {
        let stamp = started_at.format("%Y%m%d_%H%M%S");
        let name = |rate: u32| {
            dir.join(format!(
                "{}_{}_{}_{}Hz.wav",
                role.as_str(),
                session_id,
                stamp,
                rate
            ))
        };

        Ok(Self {
            file_8k: RecordingFile::create(name(TELEPHONY_SAMPLE_RATE), TELEPHONY_SAMPLE_RATE)?,
            file_16k: RecordingFile::create(
                name(TRANSCRIBE_SAMPLE_RATE),
                TRANSCRIBE_SAMPLE_RATE,
            )?,
            chunks_written: 0,
        })
    }

    /// Appends one chunk: raw 8 kHz bytes and their upsampled 16 kHz twin.
    pub fn write_chunk(&mut self, pcm_8k: &[u8], pcm_16k: &[u8]) {
        self.file_8k.write(pcm_8k);
        self.file_16k.write(pcm_16k);
        self.chunks_written += 1;
    }

    /// Paths of both output files (8 kHz first).
    #[must_use]
    pub fn paths(&self) -> (&Path, &Path) {
        (&self.file_8k.path, &self.file_16k.path)
    }

    /// Finalizes both files, logging duration and chunk count.
    pub fn close(self) {
        log::debug!("[Recorder] Closing pair after {} chunks", self.chunks_written);
        self.file_8k.finalize();
        self.file_16k.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::upsample_2x;
    use tempfile::tempdir;

    fn started_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T12:34:56Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn filenames_encode_direction_session_stamp_and_rate() {
        let dir = tempdir().unwrap();
        let pair = RecordingPair::create(
            dir.path(),
            SpeakerRole::Technician,
            "sess-42",
            started_at(),
        )
        .unwrap();

        let (path_8k, path_16k) = pair.paths();
        assert_eq!(
            path_8k.file_name().unwrap().to_str().unwrap(),
            "technician_sess-42_20250101_123456_8000Hz.wav"
        );
        assert_eq!(
            path_16k.file_name().unwrap().to_str().unwrap(),
            "technician_sess-42_20250101_123456_16000Hz.wav"
        );
    }

    #[test]
    fn silent_call_produces_complete_paired_files() {
        let dir = tempdir().unwrap();
        let mut pair =
            RecordingPair::create(dir.path(), SpeakerRole::Technician, "s1", started_at())
                .unwrap();

        // 500 chunks of 160 samples of digital silence.
        let pcm_8k = vec![0u8; 320];
        for _ in 0..500 {
            let pcm_16k = upsample_2x(&pcm_8k);
            pair.write_chunk(&pcm_8k, &pcm_16k);
        }

        let (path_8k, path_16k) = pair.paths();
        let (path_8k, path_16k) = (path_8k.to_path_buf(), path_16k.to_path_buf());
        pair.close();

        let data_8k = std::fs::read(&path_8k).unwrap();
        let data_16k = std::fs::read(&path_16k).unwrap();

        // 500 × 160 samples × 2 bytes of data after the 44-byte header.
        assert_eq!(data_8k.len(), 44 + 160_000);
        assert_eq!(data_16k.len(), 44 + 320_000);

        // Valid RIFF headers advertising the right rates and data sizes.
        for (data, rate, payload) in
            [(&data_8k, 8_000u32, 160_000u32), (&data_16k, 16_000, 320_000)]
        {
            assert_eq!(&data[0..4], b"RIFF");
            assert_eq!(&data[8..12], b"WAVE");
            let rate_field =
                u32::from_le_bytes([data[24], data[25], data[26], data[27]]);
            assert_eq!(rate_field, rate);
            let data_len = u32::from_le_bytes([data[40], data[41], data[42], data[43]]);
            assert_eq!(data_len, payload);
        }
    }

    #[test]
    fn samples_survive_the_round_trip() {
        let dir = tempdir().unwrap();
        let mut pair =
            RecordingPair::create(dir.path(), SpeakerRole::Agent, "s2", started_at()).unwrap();

        let samples: Vec<i16> = (0..160).map(|i| (i * 100) as i16).collect();
        let pcm_8k: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let pcm_16k = upsample_2x(&pcm_8k);
        pair.write_chunk(&pcm_8k, &pcm_16k);

        let (path_8k, _) = pair.paths();
        let path_8k = path_8k.to_path_buf();
        pair.close();

        let mut reader = hound::WavReader::open(&path_8k).unwrap();
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
    }
}
