//! Per-direction audio pipeline.
//!
//! Each bound direction runs one worker task that drains the ingress ring
//! serially: record every chunk, run the VAD, and hand finished segments to
//! the STT stage. Segments within a direction are processed strictly in
//! order; nothing in this file holds a session lock across a network call.
//!
//! Queueing policy:
//! - ingress ring: bounded, drop-oldest (an audio gap beats a socket stall)
//! - segment queue: bounded, drop-new with a warning (only reachable when
//!   the provider is pathologically slow)

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentPipeline;
use crate::audio::{upsample_2x, RecordingPair, SpeechSegmenter};
use crate::config::SttBackendKind;
use crate::session::SessionMetrics;
use crate::stt::{
    HallucinationFilter, RawTranscription, SttBackend, SttOutcome, SttStreamHandle,
};
use crate::transcript::{Segment, SessionOutbound, SpeakerRole, Transcript};

/// One decoded audio chunk flowing into a direction pipeline.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// 8 kHz 16-bit mono little-endian PCM.
    pub pcm: Bytes,
    /// RMS of the chunk's samples.
    pub rms: f64,
    /// Seconds since session start when the chunk arrived.
    pub elapsed_secs: f64,
}

/// What happened to a pushed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The ring was full; the oldest queued chunk was evicted.
    DroppedOldest,
}

/// Bounded drop-oldest ring between the socket reader and the pipeline.
///
/// The reader side never blocks: at ~50 chunks/second per call a stalled
/// pipeline loses the oldest audio rather than stalling the provider
/// socket.
pub struct IngressQueue {
    inner: parking_lot::Mutex<VecDeque<AudioChunk>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl IngressQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: parking_lot::Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            closed: AtomicBool::new(false),
        })
    }

    /// Queues a chunk, evicting the oldest when full. Never blocks.
    pub fn push(&self, chunk: AudioChunk) -> PushOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return PushOutcome::DroppedOldest;
        }
        let outcome = {
            let mut queue = self.inner.lock();
            let outcome = if queue.len() >= self.capacity {
                queue.pop_front();
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            queue.push_back(chunk);
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    /// Closes the ring; `recv` drains what remains, then returns `None`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<AudioChunk> {
        self.inner.lock().pop_front()
    }

    /// Awaits the next chunk.
    pub async fn recv(&self) -> Option<AudioChunk> {
        loop {
            // Register for a wakeup before checking, so a push landing
            // between the check and the await is never missed.
            let notified = self.notify.notified();
            if let Some(chunk) = self.pop() {
                return Some(chunk);
            }
            if self.closed.load(Ordering::SeqCst) {
                return self.pop();
            }
            notified.await;
        }
    }
}

/// Everything the delivery side of a pipeline needs.
///
/// Applies the hallucination filter, stamps sequence numbers, publishes to
/// subscribers and submits finals to the agent pipeline. Cloneable so the
/// batch STT stage and the streaming forwarder can each own one.
#[derive(Clone)]
pub(crate) struct TranscriptSink {
    pub session_id: String,
    pub role: SpeakerRole,
    pub started_at: Instant,
    pub outbound: broadcast::Sender<SessionOutbound>,
    pub metrics: Arc<SessionMetrics>,
    pub agent: Arc<dyn AgentPipeline>,
    pub filter: Arc<HallucinationFilter>,
    pub default_language: String,
    pub emit_interim: bool,
    /// Per-direction final counter. Interims read it; finals advance it.
    pub final_seq: Arc<AtomicU64>,
}

impl TranscriptSink {
    /// Delivers one STT outcome.
    ///
    /// `timing` is `(start_offset, duration)` when the caller knows it
    /// (batch segments); streaming results fall back to provider-reported
    /// duration anchored at delivery time.
    pub(crate) fn deliver(&self, outcome: SttOutcome, is_final: bool, timing: Option<(f64, f64)>) {
        let raw = match self.filter.apply(outcome) {
            SttOutcome::Transcribed(raw) => raw,
            SttOutcome::Filtered(reason) => {
                log::debug!(
                    "[Results] Dropped hallucinated result for {}/{}: {}",
                    self.session_id,
                    self.role,
                    reason.as_str()
                );
                self.metrics.record_hallucination();
                return;
            }
            SttOutcome::Transient(msg) => {
                log::warn!(
                    "[Results] Transient STT fault for {}/{}: {}",
                    self.session_id,
                    self.role,
                    msg
                );
                self.metrics.record_stt_failure();
                return;
            }
            SttOutcome::Fatal(msg) => {
                log::warn!(
                    "[Results] STT fault for {}/{}: {}",
                    self.session_id,
                    self.role,
                    msg
                );
                self.metrics.record_stt_failure();
                return;
            }
        };

        if !is_final && !self.emit_interim {
            return;
        }

        let (start_offset, duration) = timing.unwrap_or_else(|| {
            let duration = raw.duration.unwrap_or(0.0);
            let start = (self.started_at.elapsed().as_secs_f64() - duration).max(0.0);
            (start, duration)
        });

        let sequence = if is_final {
            self.final_seq.fetch_add(1, Ordering::SeqCst)
        } else {
            self.final_seq.load(Ordering::SeqCst)
        };

        let transcript = Transcript {
            session_id: self.session_id.clone(),
            role: self.role,
            text: raw.text,
            language: raw
                .language
                .unwrap_or_else(|| self.default_language.clone()),
            confidence: raw.confidence,
            is_final,
            start_offset,
            duration,
            timestamp: Utc::now(),
            sequence,
        };

        // Nobody listening is fine; the agent pipeline still gets finals.
        let _ = self.outbound.send(SessionOutbound::from(&transcript));
        self.metrics.record_transcript(is_final);

        if is_final {
            self.submit_to_agent(transcript);
        }
    }

    /// Fire-and-forget submission; never awaited on the hot path.
    fn submit_to_agent(&self, transcript: Transcript) {
        let agent = Arc::clone(&self.agent);
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            if let Err(e) = agent
                .submit(
                    &transcript.session_id,
                    transcript.role,
                    &transcript.text,
                    &transcript.language,
                )
                .await
            {
                log::warn!(
                    "[Results] Agent submit failed for {}/{}: {}",
                    transcript.session_id,
                    transcript.role,
                    e
                );
                metrics.record_submit_failure();
            }
        });
    }
}

/// Inputs for one direction pipeline task.
pub(crate) struct DirectionPipeline {
    pub session_id: String,
    pub role: SpeakerRole,
    pub ingress: Arc<IngressQueue>,
    pub segmenter: SpeechSegmenter,
    pub recorder: Option<RecordingPair>,
    pub stt: Arc<dyn SttBackend>,
    pub sink: TranscriptSink,
    pub mode: SttBackendKind,
    pub segment_queue_depth: usize,
    pub close_grace: Duration,
    pub cancel: CancellationToken,
}

impl DirectionPipeline {
    /// Spawns the pipeline worker for this direction.
    pub(crate) fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            match self.mode {
                SttBackendKind::Batch => self.run_batch().await,
                SttBackendKind::Streaming => self.run_streaming().await,
            }
        })
    }

    /// Batch mode: VAD cuts segments, each is resampled once whole and
    /// transcribed as an in-memory WAV upload.
    async fn run_batch(mut self) {
        let (segment_tx, segment_rx) = mpsc::channel::<Segment>(self.segment_queue_depth);
        let stt_task = tokio::spawn(batch_transcriber(
            segment_rx,
            Arc::clone(&self.stt),
            self.sink.clone(),
        ));

        let ingress = Arc::clone(&self.ingress);
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = ingress.recv() => {
                    let Some(chunk) = chunk else { break };
                    self.handle_batch_chunk(chunk, &segment_tx);
                }
            }
        }

        // Flush on close: a buffered segment long enough to matter is
        // still emitted.
        if let Some(pending) = self.segmenter.close() {
            self.dispatch_segment(pending, &segment_tx);
        }

        drop(segment_tx);
        if tokio::time::timeout(self.close_grace, stt_task).await.is_err() {
            log::warn!(
                "[Pipeline] STT stage for {}/{} exceeded close grace",
                self.session_id,
                self.role
            );
        }

        if let Some(recorder) = self.recorder.take() {
            recorder.close();
        }
        log::info!("[Pipeline] {}/{} drained", self.session_id, self.role);
    }

    fn handle_batch_chunk(&mut self, chunk: AudioChunk, segment_tx: &mpsc::Sender<Segment>) {
        if let Some(recorder) = self.recorder.as_mut() {
            let pcm_16k = upsample_2x(&chunk.pcm);
            recorder.write_chunk(&chunk.pcm, &pcm_16k);
        }

        if let Some(pending) = self
            .segmenter
            .push_chunk(chunk.pcm, chunk.rms, chunk.elapsed_secs)
        {
            self.dispatch_segment(pending, segment_tx);
        }
    }

    fn dispatch_segment(
        &self,
        pending: crate::audio::PendingSegment,
        segment_tx: &mpsc::Sender<Segment>,
    ) {
        // Exactly one 8 k → 16 k conversion over the whole segment.
        let pcm_16k = Bytes::from(upsample_2x(&pending.pcm_8k));
        let segment = Segment {
            session_id: self.session_id.clone(),
            role: self.role,
            sequence: pending.sequence,
            start_offset: pending.start_offset,
            duration: pending.duration,
            pcm_16k,
            average_rms: pending.average_rms,
        };

        self.sink.metrics.record_segment();
        log::debug!(
            "[Pipeline] Segment {} for {}/{}: {:.2}s @ {:.2}s, rms {:.0}",
            segment.sequence,
            self.session_id,
            self.role,
            segment.duration,
            segment.start_offset,
            segment.average_rms
        );

        if segment_tx.try_send(segment).is_err() {
            log::warn!(
                "[Pipeline] Segment queue full for {}/{}, dropping segment",
                self.session_id,
                self.role
            );
            self.sink.metrics.record_segment_drop();
        }
    }

    /// Streaming mode: audio bypasses the segment buffer and is fed to the
    /// provider continuously; results come back asynchronously.
    async fn run_streaming(mut self) {
        let mut stream: Option<ActiveStream> = None;
        let mut reconnect_spent = false;
        let mut terminated = false;

        let ingress = Arc::clone(&self.ingress);
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = ingress.recv() => {
                    let Some(chunk) = chunk else { break };
                    let pcm_16k = upsample_2x(&chunk.pcm);

                    if let Some(recorder) = self.recorder.as_mut() {
                        recorder.write_chunk(&chunk.pcm, &pcm_16k);
                    }

                    if terminated {
                        continue;
                    }

                    if stream.is_none() {
                        match self.connect_stream().await {
                            Ok(active) => stream = Some(active),
                            Err(e) => {
                                self.sink.metrics.record_stt_failure();
                                if reconnect_spent {
                                    log::warn!(
                                        "[Pipeline] Streaming STT gave up for {}/{}: {}",
                                        self.session_id, self.role, e
                                    );
                                    self.sink.metrics.mark_streaming_terminated();
                                    terminated = true;
                                } else {
                                    log::warn!(
                                        "[Pipeline] Streaming STT connect failed for {}/{}, will retry once: {}",
                                        self.session_id, self.role, e
                                    );
                                    reconnect_spent = true;
                                }
                                continue;
                            }
                        }
                    }

                    if let Some(active) = stream.as_mut() {
                        if let Err(e) = active.writer.write(&pcm_16k).await {
                            log::warn!(
                                "[Pipeline] Streaming write failed for {}/{}: {}",
                                self.session_id, self.role, e
                            );
                            self.sink.metrics.record_stt_failure();
                            if let Some(active) = stream.take() {
                                active.abandon();
                            }
                            // One reconnect with fresh settings; the next
                            // chunk triggers it. Audio and recording go on
                            // either way.
                            if reconnect_spent {
                                self.sink.metrics.mark_streaming_terminated();
                                terminated = true;
                            } else {
                                reconnect_spent = true;
                            }
                        }
                    }
                }
            }
        }

        if let Some(active) = stream.take() {
            active.finish(self.close_grace).await;
        }
        if let Some(recorder) = self.recorder.take() {
            recorder.close();
        }
        log::info!("[Pipeline] {}/{} drained", self.session_id, self.role);
    }

    /// Opens a provider stream and its result-forwarding task.
    async fn connect_stream(&self) -> Result<ActiveStream, crate::error::BridgeError> {
        let SttStreamHandle { writer, mut events } =
            self.stt.open_stream(&self.sink.default_language).await?;

        let sink = self.sink.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                sink.deliver(
                    SttOutcome::Transcribed(RawTranscription {
                        text: event.text,
                        language: None,
                        duration: event.duration,
                        confidence: event.confidence,
                    }),
                    event.is_final,
                    None,
                );
            }
        });

        Ok(ActiveStream { writer, forward })
    }
}

/// An open streaming session plus its result forwarder.
struct ActiveStream {
    writer: Box<dyn crate::stt::SttStreamWriter>,
    forward: tokio::task::JoinHandle<()>,
}

impl ActiveStream {
    /// Graceful close: the provider flushes pending finals, the forwarder
    /// drains them, then everything stops.
    async fn finish(self, grace: Duration) {
        if let Err(e) = self.writer.close().await {
            log::debug!("[Pipeline] Streaming close reported: {}", e);
        }
        if tokio::time::timeout(grace, self.forward).await.is_err() {
            log::warn!("[Pipeline] Streaming forwarder exceeded close grace");
        }
    }

    /// Teardown after a mid-session failure; nothing left to flush.
    fn abandon(self) {
        self.forward.abort();
        tokio::spawn(async move {
            let _ = self.writer.close().await;
        });
    }
}

/// Drains the segment queue strictly in order, one STT call at a time.
async fn batch_transcriber(
    mut segments: mpsc::Receiver<Segment>,
    stt: Arc<dyn SttBackend>,
    sink: TranscriptSink,
) {
    while let Some(segment) = segments.recv().await {
        let outcome = stt
            .transcribe_batch(&segment.pcm_16k, &sink.default_language)
            .await;
        sink.deliver(
            outcome,
            true,
            Some((segment.start_offset, segment.duration)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: u8) -> AudioChunk {
        AudioChunk {
            pcm: Bytes::from(vec![tag; 4]),
            rms: 0.0,
            elapsed_secs: 0.0,
        }
    }

    #[tokio::test]
    async fn ingress_delivers_in_order() {
        let queue = IngressQueue::new(8);
        queue.push(chunk(1));
        queue.push(chunk(2));
        queue.push(chunk(3));

        assert_eq!(queue.recv().await.unwrap().pcm[0], 1);
        assert_eq!(queue.recv().await.unwrap().pcm[0], 2);
        assert_eq!(queue.recv().await.unwrap().pcm[0], 3);
    }

    #[tokio::test]
    async fn ingress_overflow_drops_oldest() {
        let queue = IngressQueue::new(2);
        assert_eq!(queue.push(chunk(1)), PushOutcome::Queued);
        assert_eq!(queue.push(chunk(2)), PushOutcome::Queued);
        assert_eq!(queue.push(chunk(3)), PushOutcome::DroppedOldest);

        // Chunk 1 was evicted; 2 and 3 survive in order.
        assert_eq!(queue.recv().await.unwrap().pcm[0], 2);
        assert_eq!(queue.recv().await.unwrap().pcm[0], 3);
    }

    #[tokio::test]
    async fn ingress_drains_after_close() {
        let queue = IngressQueue::new(8);
        queue.push(chunk(1));
        queue.push(chunk(2));
        queue.close();

        assert!(queue.recv().await.is_some());
        assert!(queue.recv().await.is_some());
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn ingress_recv_wakes_on_push() {
        let queue = IngressQueue::new(8);
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };
        tokio::task::yield_now().await;
        queue.push(chunk(7));

        let received = waiter.await.unwrap().unwrap();
        assert_eq!(received.pcm[0], 7);
    }

    #[tokio::test]
    async fn ingress_recv_wakes_on_close() {
        let queue = IngressQueue::new(8);
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };
        tokio::task::yield_now().await;
        queue.close();

        assert!(waiter.await.unwrap().is_none());
    }
}
