//! Process-wide session registry.
//!
//! Owns the mapping from session id to [`Session`] and everything about
//! their lifecycles: direction binding, subscriber attachment, transcript
//! publication, metrics snapshots, idle sweeping and shutdown. This is the
//! only process-wide mutable state in the core.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentPipeline;
use crate::audio::{RecordingPair, SegmenterConfig, SpeechSegmenter};
use crate::config::Config;
use crate::error::{BridgeError, BridgeResult};
use crate::session::worker::{DirectionPipeline, IngressQueue, TranscriptSink};
use crate::session::{CloseReason, DirectionHandle, MetricsSnapshot, Session, SessionMetrics};
use crate::stt::{HallucinationFilter, SttBackend};
use crate::transcript::{SessionOutbound, SpeakerRole, SubscriberFilter, Transcript};

/// A subscriber's attachment to one session.
///
/// Holds the broadcast receiver plus the filter the transport applies
/// before pushing frames. Dropping the handle detaches the subscriber.
pub struct SubscriberHandle {
    pub session_id: String,
    pub receiver: broadcast::Receiver<SessionOutbound>,
    pub filter: SubscriberFilter,
    /// For counting per-subscriber overflow drops.
    pub metrics: Arc<SessionMetrics>,
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

/// Summary row for the sessions listing endpoint.
#[derive(Debug, serde::Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub directions: Vec<SpeakerRole>,
    pub uptime_secs: f64,
}

/// Keyed store and lifecycle owner for all live sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    config: Arc<Config>,
    stt: Arc<dyn SttBackend>,
    agent: Arc<dyn AgentPipeline>,
    filter: Arc<HallucinationFilter>,
    cancel: CancellationToken,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new(
        config: Arc<Config>,
        stt: Arc<dyn SttBackend>,
        agent: Arc<dyn AgentPipeline>,
        cancel: CancellationToken,
    ) -> Self {
        let filter = Arc::new(HallucinationFilter::new(&config.hallucination_phrases));
        Self {
            sessions: DashMap::new(),
            config,
            stt,
            agent,
            filter,
            cancel,
        }
    }

    /// Opens a session direction, creating the session on first use.
    ///
    /// Idempotence is per `(session_id, role)`: a second open of the same
    /// direction fails with `AlreadyBound`.
    pub fn open(
        &self,
        session_id: &str,
        role: SpeakerRole,
        stream_id: String,
    ) -> BridgeResult<Arc<Session>> {
        let session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Session::new(
                    session_id.to_string(),
                    self.config.queues.subscriber_capacity,
                )
            })
            .clone();

        if session.is_closed() {
            return Err(BridgeError::SessionClosed(session_id.to_string()));
        }

        let handle = self.build_direction(&session, role, stream_id)?;
        session.bind_direction(role, handle).map_err(|rejected| {
            // Unwind the freshly spawned pipeline; the bound one stays.
            let stream_id = rejected.stream_id.clone();
            tokio::spawn(rejected.shutdown(Duration::from_secs(1)));
            log::warn!(
                "[Registry] Direction {}/{} already bound (stream {})",
                session_id,
                role,
                stream_id
            );
            BridgeError::AlreadyBound {
                session_id: session_id.to_string(),
                role,
            }
        })?;

        log::info!("[Registry] Opened {}/{}", session_id, role);
        Ok(session)
    }

    /// Wires the ingress ring, segmenter, recorder and pipeline task for
    /// one direction.
    fn build_direction(
        &self,
        session: &Arc<Session>,
        role: SpeakerRole,
        stream_id: String,
    ) -> BridgeResult<DirectionHandle> {
        let recorder = if self.config.recording.enabled {
            match RecordingPair::create(
                &self.config.recording.dir,
                role,
                &session.id,
                session.started_at_utc(),
            ) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    // Recording trouble never takes down the call.
                    log::warn!("[Registry] Recording disabled for {}/{}: {}", session.id, role, e);
                    None
                }
            }
        } else {
            None
        };

        let ingress = IngressQueue::new(self.config.queues.ingress_chunks);
        let sink = TranscriptSink {
            session_id: session.id.clone(),
            role,
            started_at: session.started_at(),
            outbound: session.outbound.clone(),
            metrics: Arc::clone(&session.metrics),
            agent: Arc::clone(&self.agent),
            filter: Arc::clone(&self.filter),
            default_language: self.config.stt.language.clone(),
            emit_interim: self.config.stt.emit_interim,
            final_seq: Arc::new(AtomicU64::new(0)),
        };

        let worker = DirectionPipeline {
            session_id: session.id.clone(),
            role,
            ingress: Arc::clone(&ingress),
            segmenter: SpeechSegmenter::new(SegmenterConfig::from(&self.config.vad)),
            recorder,
            stt: Arc::clone(&self.stt),
            sink,
            mode: self.config.stt.backend,
            segment_queue_depth: self.config.queues.segments,
            close_grace: Duration::from_secs(self.config.close_grace_secs),
            cancel: self.cancel.child_token(),
        }
        .spawn();

        Ok(DirectionHandle::new(stream_id, ingress, worker))
    }

    /// Looks up a live session.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|r| Arc::clone(r.value()))
    }

    /// Detaches one direction; removes the session when it was the last.
    ///
    /// Idempotent: closing an unknown session or unbound direction is a
    /// no-op.
    pub async fn close_direction(&self, session_id: &str, role: SpeakerRole, reason: CloseReason) {
        let Some(session) = self.get(session_id) else {
            return;
        };
        if let Some(handle) = session.detach_direction(role) {
            log::info!(
                "[Registry] Closing {}/{} ({})",
                session_id,
                role,
                reason.as_str()
            );
            handle.shutdown(self.close_grace()).await;
        }
        if !session.has_directions() {
            self.finalize(&session, reason).await;
        }
    }

    /// Force-closes a whole session. Idempotent.
    pub async fn close_session(&self, session_id: &str, reason: CloseReason) {
        let Some(session) = self.get(session_id) else {
            return;
        };
        for handle in session.detach_all() {
            handle.shutdown(self.close_grace()).await;
        }
        self.finalize(&session, reason).await;
    }

    /// Marks the session closed, notifies subscribers, removes the entry.
    async fn finalize(&self, session: &Arc<Session>, reason: CloseReason) {
        if !session.mark_closed() {
            return;
        }
        session.publish(SessionOutbound::SessionEnded {
            reason: reason.as_str().to_string(),
        });
        self.sessions.remove(&session.id);
        log::info!(
            "[Registry] Session {} removed ({}), {} remaining",
            session.id,
            reason.as_str(),
            self.sessions.len()
        );
    }

    /// Attaches a push subscriber to a session.
    pub fn subscribe(
        &self,
        session_id: &str,
        filter: SubscriberFilter,
    ) -> BridgeResult<SubscriberHandle> {
        let session = self
            .get(session_id)
            .ok_or_else(|| BridgeError::UnknownSession(session_id.to_string()))?;
        Ok(SubscriberHandle {
            session_id: session.id.clone(),
            receiver: session.outbound.subscribe(),
            filter,
            metrics: Arc::clone(&session.metrics),
        })
    }

    /// Publishes a transcript to a session's subscribers.
    pub fn publish(&self, session_id: &str, transcript: &Transcript) -> BridgeResult<()> {
        let session = self
            .get(session_id)
            .ok_or_else(|| BridgeError::UnknownSession(session_id.to_string()))?;
        session.publish(SessionOutbound::from(transcript));
        Ok(())
    }

    /// Non-blocking counters snapshot for one session.
    pub fn snapshot(&self, session_id: &str) -> BridgeResult<MetricsSnapshot> {
        let session = self
            .get(session_id)
            .ok_or_else(|| BridgeError::UnknownSession(session_id.to_string()))?;
        Ok(session.metrics.snapshot(session.state_label()))
    }

    /// Summary of all live sessions.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .iter()
            .map(|r| SessionSummary {
                session_id: r.key().clone(),
                directions: r.value().bound_roles(),
                uptime_secs: r.value().elapsed_secs(),
            })
            .collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Spawns the idle sweeper that force-closes inactive sessions.
    pub fn spawn_idle_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let idle_timeout = Duration::from_secs(registry.config.session_idle_timeout_secs);
        let sweep_interval = Duration::from_secs(registry.config.idle_sweep_interval_secs.max(1));
        let cancel = registry.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let idle: Vec<String> = registry
                    .sessions
                    .iter()
                    .filter(|r| r.value().idle_for() > idle_timeout)
                    .map(|r| r.key().clone())
                    .collect();

                for session_id in idle {
                    log::warn!("[Registry] Session {} idle, force-closing", session_id);
                    registry
                        .close_session(&session_id, CloseReason::InactivityTimeout)
                        .await;
                }
            }
        })
    }

    /// Closes every session for process shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|r| r.key().clone()).collect();
        log::info!("[Registry] Shutting down {} session(s)", ids.len());
        for session_id in ids {
            self.close_session(&session_id, CloseReason::ServerShutdown)
                .await;
        }
    }

    fn close_grace(&self) -> Duration {
        // Room for one full STT grace period plus pipeline teardown.
        Duration::from_secs(self.config.close_grace_secs + 2)
    }
}
