//! Speech-to-text provider abstraction.
//!
//! Two interchangeable backends sit behind [`SttBackend`]: a per-segment
//! HTTP upload ([`batch`]) and a persistent provider WebSocket
//! ([`streaming`]). Both produce [`SttOutcome`] values — a sum type, not
//! exceptions — which the result filter and delivery layers match on.

pub mod batch;
pub mod filter;
pub mod streaming;

pub use batch::BatchSttClient;
pub use filter::{HallucinationFilter, RejectReason};
pub use streaming::StreamingSttClient;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BridgeResult;

/// A provider transcription before filtering and sequencing.
#[derive(Debug, Clone)]
pub struct RawTranscription {
    pub text: String,
    /// Detected language, if the provider reports one.
    pub language: Option<String>,
    /// Spoken duration in seconds, if the provider reports one.
    pub duration: Option<f64>,
    /// Mean confidence in 0..1, if the provider reports one.
    pub confidence: Option<f32>,
}

/// Result of one transcription attempt.
///
/// `Filtered` is produced by [`HallucinationFilter::apply`], never by a
/// backend directly.
#[derive(Debug)]
pub enum SttOutcome {
    /// The provider returned usable text.
    Transcribed(RawTranscription),
    /// The text was rejected by the hallucination filter.
    Filtered(RejectReason),
    /// Retryable provider fault (timeout, 5xx, dropped socket).
    Transient(String),
    /// Non-retryable fault (bad request, unparseable response).
    Fatal(String),
}

/// An interim or final result from a streaming session.
#[derive(Debug, Clone)]
pub struct SttEvent {
    pub text: String,
    pub is_final: bool,
    pub confidence: Option<f32>,
    /// Spoken duration in seconds, if the provider reports one.
    pub duration: Option<f64>,
}

/// Write half of an open streaming session.
#[async_trait]
pub trait SttStreamWriter: Send {
    /// Feeds 16 kHz 16-bit mono PCM to the provider.
    async fn write(&mut self, pcm_16k: &[u8]) -> BridgeResult<()>;

    /// Closes the session; the provider flushes any pending final result
    /// before the event channel ends.
    async fn close(self: Box<Self>) -> BridgeResult<()>;
}

/// An open streaming session: the audio writer plus the result stream.
pub struct SttStreamHandle {
    pub writer: Box<dyn SttStreamWriter>,
    pub events: mpsc::Receiver<SttEvent>,
}

impl std::fmt::Debug for SttStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SttStreamHandle").finish_non_exhaustive()
    }
}

/// A pluggable speech-to-text provider.
#[async_trait]
pub trait SttBackend: Send + Sync {
    /// Transcribes one complete 16 kHz PCM segment.
    async fn transcribe_batch(&self, pcm_16k: &[u8], language: &str) -> SttOutcome;

    /// Opens a persistent streaming session for one session direction.
    async fn open_stream(&self, language: &str) -> BridgeResult<SttStreamHandle>;

    /// Short provider name for logs.
    fn name(&self) -> &'static str;
}
