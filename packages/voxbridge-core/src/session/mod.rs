//! Session lifecycle types.
//!
//! A [`Session`] is the lifetime of one call inside the core, keyed by an
//! opaque id assigned by the call-control surface. Each session owns up to
//! two directions (technician / agent), a broadcast channel feeding its
//! subscribers, and a set of pipeline counters. Sessions are owned
//! exclusively by the [`registry::SessionRegistry`]; everything else holds
//! borrowed `Arc` handles that die with the session.

pub mod metrics;
pub mod registry;
pub mod worker;

pub use metrics::{MetricsSnapshot, SessionMetrics};
pub use registry::{SessionRegistry, SubscriberHandle};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::audio::{decode_mulaw, rms, samples_to_le_bytes};
use crate::session::worker::{AudioChunk, IngressQueue, PushOutcome};
use crate::transcript::{SessionOutbound, SpeakerRole};

/// Why a session or direction went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The provider sent a `stop` frame.
    ProviderStop,
    /// The provider socket dropped without a `stop`.
    SocketError,
    /// No media arrived within the idle timeout.
    InactivityTimeout,
    /// The server is shutting down.
    ServerShutdown,
    /// An unexpected internal failure force-closed the session.
    InternalError,
}

impl CloseReason {
    /// Short reason code surfaced to subscribers in `session_ended`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderStop => "stop",
            Self::SocketError => "socket_error",
            Self::InactivityTimeout => "inactivity_timeout",
            Self::ServerShutdown => "server_shutdown",
            Self::InternalError => "internal_error",
        }
    }
}

/// One bound direction: its ingress ring and pipeline task.
pub(crate) struct DirectionHandle {
    /// Provider-assigned stream identifier, kept for logs.
    pub stream_id: String,
    pub ingress: Arc<IngressQueue>,
    worker: tokio::task::JoinHandle<()>,
}

impl DirectionHandle {
    pub(crate) fn new(
        stream_id: String,
        ingress: Arc<IngressQueue>,
        worker: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self {
            stream_id,
            ingress,
            worker,
        }
    }

    /// Closes the ingress ring and waits for the pipeline to drain.
    ///
    /// The pipeline gets `grace` to finish in-flight STT work, then is
    /// aborted.
    pub(crate) async fn shutdown(mut self, grace: Duration) {
        self.ingress.close();
        if tokio::time::timeout(grace, &mut self.worker).await.is_err() {
            log::warn!(
                "[Session] Pipeline for stream {} exceeded the close grace, aborting",
                self.stream_id
            );
            self.worker.abort();
        }
    }
}

/// State for a single live call.
pub struct Session {
    pub id: String,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    /// Fan-out channel; every subscriber holds a receiver.
    pub outbound: broadcast::Sender<SessionOutbound>,
    pub metrics: Arc<SessionMetrics>,
    directions: Mutex<HashMap<SpeakerRole, DirectionHandle>>,
    closed: AtomicBool,
    last_media: Mutex<Instant>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a live session with a subscriber channel of the given depth.
    pub(crate) fn new(id: String, subscriber_capacity: usize) -> Arc<Self> {
        let (outbound, _) = broadcast::channel(subscriber_capacity);
        let now = Instant::now();
        log::info!("[Session] Created {}", id);
        Arc::new(Self {
            id,
            started_at: now,
            started_at_utc: Utc::now(),
            outbound,
            metrics: Arc::new(SessionMetrics::default()),
            directions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            last_media: Mutex::new(now),
        })
    }

    /// Seconds since the session started.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Monotonic session start, shared with the pipeline workers.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Wall-clock session start, used for recording filenames.
    #[must_use]
    pub fn started_at_utc(&self) -> DateTime<Utc> {
        self.started_at_utc
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Label for metrics snapshots.
    #[must_use]
    pub fn state_label(&self) -> &'static str {
        if self.is_closed() {
            "closed"
        } else {
            "live"
        }
    }

    /// Marks the session closed.
    ///
    /// Returns `true` only for the first caller, making close idempotent.
    pub(crate) fn mark_closed(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Time since the last media frame on any direction.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_media.lock().elapsed()
    }

    /// Decodes one µ-law media payload and queues it for the direction.
    ///
    /// Never blocks the caller: a full ingress ring evicts its oldest
    /// chunk. Frames for closed sessions or unbound directions are dropped.
    pub fn ingest_media(&self, role: SpeakerRole, payload: &[u8]) {
        if self.is_closed() {
            return;
        }
        *self.last_media.lock() = Instant::now();

        let Some(ingress) = self
            .directions
            .lock()
            .get(&role)
            .map(|d| Arc::clone(&d.ingress))
        else {
            log::warn!(
                "[Session] Media for unbound direction {}/{}, dropping",
                self.id,
                role
            );
            return;
        };

        let samples = decode_mulaw(payload);
        let chunk = AudioChunk {
            rms: rms(&samples),
            pcm: samples_to_le_bytes(&samples),
            elapsed_secs: self.elapsed_secs(),
        };

        self.metrics.record_chunk();
        if ingress.push(chunk) == PushOutcome::DroppedOldest {
            self.metrics.record_chunk_drop();
        }
    }

    /// Publishes one outbound frame to all subscribers.
    ///
    /// A send error only means nobody is listening right now.
    pub fn publish(&self, outbound: SessionOutbound) {
        let _ = self.outbound.send(outbound);
    }

    /// Binds a direction. Fails if the same direction is already bound.
    pub(crate) fn bind_direction(
        &self,
        role: SpeakerRole,
        handle: DirectionHandle,
    ) -> Result<(), DirectionHandle> {
        let mut directions = self.directions.lock();
        if directions.contains_key(&role) {
            return Err(handle);
        }
        directions.insert(role, handle);
        Ok(())
    }

    /// Detaches a direction, returning its handle for shutdown.
    pub(crate) fn detach_direction(&self, role: SpeakerRole) -> Option<DirectionHandle> {
        self.directions.lock().remove(&role)
    }

    /// Detaches every bound direction.
    pub(crate) fn detach_all(&self) -> Vec<DirectionHandle> {
        self.directions.lock().drain().map(|(_, h)| h).collect()
    }

    /// Whether any direction is still bound.
    #[must_use]
    pub fn has_directions(&self) -> bool {
        !self.directions.lock().is_empty()
    }

    /// Roles currently bound, for the sessions listing.
    #[must_use]
    pub fn bound_roles(&self) -> Vec<SpeakerRole> {
        self.directions.lock().keys().copied().collect()
    }
}
