//! Core configuration types.
//!
//! Groups the tunable behavior of the pipeline into sub-structs: voice
//! activity detection ([`VadConfig`]), speech-to-text ([`SttConfig`]),
//! recording ([`RecordingConfig`]) and queue sizing ([`QueueConfig`]).
//! All fields have sensible defaults; `validate()` is called once at
//! bootstrap and configuration errors are fatal on boot.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default hallucination phrases rejected by the result filter.
///
/// These are the classic provider echo artifacts: subtitle credits and
/// sign-off boilerplate that speech models emit for near-silent audio.
fn default_hallucination_phrases() -> Vec<String> {
    [
        "thanks for watching",
        "thank you for watching",
        "subtitles by",
        "sous-titrage",
        "amara.org",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// Voice-activity detection thresholds.
///
/// RMS values are compared against the root-mean-square of signed 16-bit
/// samples, so the useful range is roughly 0..32767. Durations are in
/// seconds of audio time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS at or above which an idle direction starts buffering speech.
    pub speech_start_rms: u32,

    /// RMS below which a chunk counts as silence while buffering.
    /// `None` means "same as `speech_start_rms`".
    pub silence_rms: Option<u32>,

    /// Continuous silence needed to end a segment (seconds).
    pub silence_hang_secs: f64,

    /// Minimum segment length worth emitting (seconds).
    pub min_speech_secs: f64,

    /// Force-cut segment length (seconds).
    pub max_segment_secs: f64,

    /// Whole-segment average RMS below which the segment is discarded.
    /// 0 disables the check.
    pub segment_reject_rms: u32,

    /// Audio received within this many seconds of session start is
    /// discarded regardless of energy (telephony connect clicks).
    pub startup_guard_secs: f64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_start_rms: 10,
            silence_rms: None,
            silence_hang_secs: 1.0,
            min_speech_secs: 0.5,
            max_segment_secs: 10.0,
            segment_reject_rms: 0,
            startup_guard_secs: 0.5,
        }
    }
}

impl VadConfig {
    /// Effective silence threshold (defaults to the speech-start threshold).
    #[must_use]
    pub fn effective_silence_rms(&self) -> u32 {
        self.silence_rms.unwrap_or(self.speech_start_rms)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_speech_secs <= 0.0 {
            return Err("min_speech_secs must be > 0".to_string());
        }
        if self.max_segment_secs < self.min_speech_secs {
            return Err("max_segment_secs must be >= min_speech_secs".to_string());
        }
        if self.silence_hang_secs <= 0.0 {
            return Err("silence_hang_secs must be > 0".to_string());
        }
        Ok(())
    }
}

/// Which speech-to-text backend the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttBackendKind {
    /// Per-segment WAV upload over HTTP.
    Batch,
    /// Persistent provider WebSocket fed with continuous PCM.
    Streaming,
}

/// Speech-to-text provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Selected backend.
    pub backend: SttBackendKind,

    /// BCP-47 short language code passed to the provider (e.g. "fr").
    pub language: String,

    /// Whether interim streaming results are pushed to subscribers.
    pub emit_interim: bool,

    /// HTTP endpoint for the batch backend.
    pub batch_endpoint: String,

    /// WebSocket endpoint for the streaming backend.
    pub streaming_endpoint: String,

    /// Provider API key. Required unless both endpoints are local.
    pub api_key: Option<String>,

    /// Optional provider model name.
    pub model: Option<String>,

    /// Timeout for a batch transcription call (seconds).
    pub batch_timeout_secs: u64,

    /// Timeout for establishing the streaming connection (seconds).
    pub connect_timeout_secs: u64,

    /// Idle keepalive ping interval on the streaming connection (seconds).
    pub keepalive_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            backend: SttBackendKind::Streaming,
            language: "fr".to_string(),
            emit_interim: false,
            batch_endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            streaming_endpoint: "wss://api.deepgram.com/v1/listen".to_string(),
            api_key: None,
            model: None,
            batch_timeout_secs: 30,
            connect_timeout_secs: 10,
            keepalive_secs: 20,
        }
    }
}

impl SttConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        match self.backend {
            SttBackendKind::Batch if self.batch_endpoint.is_empty() => {
                Err("batch backend selected but batch_endpoint is empty".to_string())
            }
            SttBackendKind::Streaming if self.streaming_endpoint.is_empty() => {
                Err("streaming backend selected but streaming_endpoint is empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Recording output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Produce paired WAV files per session direction.
    pub enabled: bool,

    /// Output directory; created at bootstrap if absent.
    pub dir: PathBuf,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("./audio_recordings"),
        }
    }
}

/// Bounded queue depths between pipeline stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Audio ingress ring depth in chunks (~20 ms each). On overflow the
    /// oldest queued chunk is dropped; an audio drop beats a socket stall.
    pub ingress_chunks: usize,

    /// Segment queue depth between the VAD and the STT worker.
    pub segments: usize,

    /// Per-subscriber outbound message capacity. Slow subscribers lag and
    /// lose the oldest messages.
    pub subscriber_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            ingress_chunks: 256,
            segments: 8,
            subscriber_capacity: 64,
        }
    }
}

impl QueueConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.ingress_chunks == 0 {
            return Err("ingress_chunks must be >= 1".to_string());
        }
        if self.segments == 0 {
            return Err("segments must be >= 1".to_string());
        }
        if self.subscriber_capacity == 0 {
            return Err(
                "subscriber_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }
}

/// Configuration for the VoxBridge core.
///
/// All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Server
    /// Preferred port for the HTTP/WS server (0 = auto-allocate).
    pub preferred_port: u16,

    /// Path the telephony provider connects to with media streams.
    pub media_path: String,

    // Pipeline
    /// Voice-activity detection thresholds.
    pub vad: VadConfig,

    /// Speech-to-text provider settings.
    pub stt: SttConfig,

    /// Recording output settings.
    pub recording: RecordingConfig,

    /// Bounded queue depths.
    pub queues: QueueConfig,

    // Sessions
    /// Force-close sessions with no media for this long (seconds).
    pub session_idle_timeout_secs: u64,

    /// Interval between idle-session sweeps (seconds).
    pub idle_sweep_interval_secs: u64,

    /// How long media frames arriving before `start` are held (milliseconds).
    pub pending_media_grace_ms: u64,

    /// Grace period for in-flight STT work during session close (seconds).
    pub close_grace_secs: u64,

    // Results
    /// Case-folded substrings that reject a transcription result.
    pub hallucination_phrases: Vec<String>,

    /// Optional endpoint final transcripts are submitted to.
    pub agent_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: 0,
            media_path: "/twilio/media-stream".to_string(),
            vad: VadConfig::default(),
            stt: SttConfig::default(),
            recording: RecordingConfig::default(),
            queues: QueueConfig::default(),
            session_idle_timeout_secs: 600,
            idle_sweep_interval_secs: 30,
            pending_media_grace_ms: 500,
            close_grace_secs: 5,
            hallucination_phrases: default_hallucination_phrases(),
            agent_endpoint: None,
        }
    }
}

impl Config {
    /// Validates the whole configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.vad.validate()?;
        self.stt.validate()?;
        self.queues.validate()?;
        if self.media_path.is_empty() || !self.media_path.starts_with('/') {
            return Err("media_path must be an absolute URL path".to_string());
        }
        if self.session_idle_timeout_secs == 0 {
            return Err("session_idle_timeout_secs must be >= 1".to_string());
        }
        Ok(())
    }
}
