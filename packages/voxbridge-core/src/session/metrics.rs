//! Per-session pipeline counters.
//!
//! Lock-free counters updated from the hot path and snapshotted by the
//! metrics endpoint. Snapshots are non-blocking reads of the atomics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Counters for one session, shared across its pipeline tasks.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Media chunks decoded and queued.
    chunks_received: AtomicU64,
    /// Chunks evicted from a full ingress ring.
    chunks_dropped: AtomicU64,
    /// Segments the VAD emitted.
    segments_emitted: AtomicU64,
    /// Segments dropped on a full segment queue.
    segments_dropped: AtomicU64,
    /// Final transcripts published.
    transcripts_final: AtomicU64,
    /// Interim transcripts published.
    transcripts_interim: AtomicU64,
    /// Results rejected by the hallucination filter.
    hallucinations_dropped: AtomicU64,
    /// Provider faults (timeouts, disconnects, bad responses).
    stt_failures: AtomicU64,
    /// Messages slow subscribers lost to ring overflow.
    subscriber_drops: AtomicU64,
    /// Agent-pipeline submissions that failed.
    submit_failures: AtomicU64,
    /// The streaming transcript path gave up after a failed reconnect.
    streaming_terminated: AtomicBool,
}

impl SessionMetrics {
    pub fn record_chunk(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk_drop(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment(&self) {
        self.segments_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment_drop(&self) {
        self.segments_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transcript(&self, is_final: bool) {
        if is_final {
            self.transcripts_final.fetch_add(1, Ordering::Relaxed);
        } else {
            self.transcripts_interim.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_hallucination(&self) {
        self.hallucinations_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stt_failure(&self) {
        self.stt_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscriber_drops(&self, count: u64) {
        self.subscriber_drops.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_submit_failure(&self) {
        self.submit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_streaming_terminated(&self) {
        self.streaming_terminated.store(true, Ordering::Relaxed);
    }

    /// Non-blocking snapshot of the current counters.
    #[must_use]
    pub fn snapshot(&self, state: &'static str) -> MetricsSnapshot {
        MetricsSnapshot {
            state,
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            segments_emitted: self.segments_emitted.load(Ordering::Relaxed),
            segments_dropped: self.segments_dropped.load(Ordering::Relaxed),
            transcripts_final: self.transcripts_final.load(Ordering::Relaxed),
            transcripts_interim: self.transcripts_interim.load(Ordering::Relaxed),
            hallucinations_dropped: self.hallucinations_dropped.load(Ordering::Relaxed),
            stt_failures: self.stt_failures.load(Ordering::Relaxed),
            subscriber_drops: self.subscriber_drops.load(Ordering::Relaxed),
            submit_failures: self.submit_failures.load(Ordering::Relaxed),
            streaming_terminated: self.streaming_terminated.load(Ordering::Relaxed),
        }
    }
}

/// Serializable point-in-time view of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub state: &'static str,
    pub chunks_received: u64,
    pub chunks_dropped: u64,
    pub segments_emitted: u64,
    pub segments_dropped: u64,
    pub transcripts_final: u64,
    pub transcripts_interim: u64,
    pub hallucinations_dropped: u64,
    pub stt_failures: u64,
    pub subscriber_drops: u64,
    pub submit_failures: u64,
    pub streaming_terminated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let metrics = SessionMetrics::default();
        metrics.record_chunk();
        metrics.record_chunk();
        metrics.record_segment();
        metrics.record_transcript(true);
        metrics.record_transcript(false);
        metrics.record_hallucination();
        metrics.record_subscriber_drops(3);

        let snap = metrics.snapshot("live");
        assert_eq!(snap.chunks_received, 2);
        assert_eq!(snap.segments_emitted, 1);
        assert_eq!(snap.transcripts_final, 1);
        assert_eq!(snap.transcripts_interim, 1);
        assert_eq!(snap.hallucinations_dropped, 1);
        assert_eq!(snap.subscriber_drops, 3);
        assert!(!snap.streaming_terminated);
    }

    #[test]
    fn streaming_termination_is_sticky() {
        let metrics = SessionMetrics::default();
        metrics.mark_streaming_terminated();
        assert!(metrics.snapshot("live").streaming_terminated);
    }
}
