//! Transcript and fan-out value types.
//!
//! Everything that flows out of the pipeline is defined here: speech
//! [`Segment`]s produced by the VAD, [`Transcript`]s produced by the STT
//! layer, and the serde-tagged [`SessionOutbound`] frames pushed to
//! subscriber WebSockets.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One audio side of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRole {
    /// The remote party on the phone leg.
    Technician,
    /// The browser-side support agent.
    Agent,
}

impl SpeakerRole {
    /// Returns the role as a short string identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Technician => "technician",
            Self::Agent => "agent",
        }
    }

    /// Human-facing label used in subscriber frames.
    #[must_use]
    pub const fn display_label(&self) -> &'static str {
        match self {
            Self::Technician => "Technician",
            Self::Agent => "Agent",
        }
    }

    /// Parses a role from provider custom parameters.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "technician" => Some(Self::Technician),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

impl std::fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous span of speech emitted by the segmenter, ready for
/// transcription.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Owning session.
    pub session_id: String,
    /// Direction the audio came from.
    pub role: SpeakerRole,
    /// Monotonic per-direction sequence, starting at 0.
    pub sequence: u64,
    /// Seconds from session start to the first voiced chunk.
    pub start_offset: f64,
    /// Segment length in seconds of audio.
    pub duration: f64,
    /// 16 kHz 16-bit mono little-endian PCM.
    pub pcm_16k: Bytes,
    /// Average RMS over the whole segment.
    pub average_rms: f64,
}

/// A committed (or interim) transcription result.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub session_id: String,
    pub role: SpeakerRole,
    pub text: String,
    /// BCP-47 short language code (e.g. "fr").
    pub language: String,
    pub confidence: Option<f32>,
    pub is_final: bool,
    /// Seconds from session start.
    pub start_offset: f64,
    /// Spoken duration in seconds.
    pub duration: f64,
    /// Wall-clock time the result was produced.
    pub timestamp: DateTime<Utc>,
    /// Per-direction final-transcript sequence. Interim results carry the
    /// sequence of the final they will eventually become.
    pub sequence: u64,
}

/// Which transcripts a subscriber wants to receive.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriberFilter {
    /// Speaker roles to receive. Empty means "all roles".
    #[serde(default)]
    pub speaker_roles: Vec<SpeakerRole>,
    /// Whether interim (non-final) results are delivered.
    #[serde(default)]
    pub include_interim: bool,
}

impl Default for SubscriberFilter {
    fn default() -> Self {
        Self {
            speaker_roles: Vec::new(),
            include_interim: true,
        }
    }
}

impl SubscriberFilter {
    /// Returns whether a transcript frame passes this filter.
    #[must_use]
    pub fn matches(&self, role: SpeakerRole, is_final: bool) -> bool {
        if !is_final && !self.include_interim {
            return false;
        }
        self.speaker_roles.is_empty() || self.speaker_roles.contains(&role)
    }
}

/// Wire shape of a transcription frame pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptFrame {
    pub text: String,
    pub speaker_role: SpeakerRole,
    pub speaker_label: &'static str,
    pub language: String,
    pub is_final: bool,
    pub confidence: Option<f32>,
    /// RFC 3339 with millisecond precision.
    pub timestamp: String,
    pub start_offset: f64,
    pub duration: f64,
    pub sequence: u64,
}

impl From<&Transcript> for TranscriptFrame {
    fn from(t: &Transcript) -> Self {
        Self {
            text: t.text.clone(),
            speaker_role: t.role,
            speaker_label: t.role.display_label(),
            language: t.language.clone(),
            is_final: t.is_final,
            confidence: t.confidence,
            timestamp: t.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            start_offset: t.start_offset,
            duration: t.duration,
            sequence: t.sequence,
        }
    }
}

/// Frames broadcast to session subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionOutbound {
    /// Sent once directly after a subscriber connects.
    Connected { session_id: String },
    /// A transcription result.
    Transcription(TranscriptFrame),
    /// The session is over; the server closes the socket after this frame.
    SessionEnded { reason: String },
}

impl From<&Transcript> for SessionOutbound {
    fn from(t: &Transcript) -> Self {
        Self::Transcription(TranscriptFrame::from(t))
    }
}
