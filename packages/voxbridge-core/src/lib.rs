//! VoxBridge Core - shared library for the VoxBridge transcription bridge.
//!
//! This crate implements the real-time audio and transcription pipeline
//! that sits between a telephony provider and downstream consumers: a
//! support agent's browser places a call to a remote technician, the
//! provider streams the call audio here over WebSocket, and the pipeline
//! transcribes speech segment-by-segment and fans results out to browser
//! subscribers and the analysis pipeline.
//!
//! # Architecture
//!
//! - [`api`]: HTTP/WebSocket surface (media gateway, subscriber push)
//! - [`session`]: session registry, per-direction pipeline workers
//! - [`audio`]: µ-law decoding, VAD segmentation, resampling, recording
//! - [`stt`]: pluggable speech-to-text backends and the result filter
//! - [`agent`]: downstream agent-pipeline contract
//! - [`bootstrap`]: composition root wiring everything together
//! - [`config`] / [`error`]: configuration and the error taxonomy
//!
//! Dataflow, leaves first: audio ingress → segment buffer & VAD →
//! resampler & recorder → STT adapter → result filter & fan-out →
//! session subscribers.

#![warn(clippy::all)]

pub mod agent;
pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod session;
pub mod stt;
pub mod transcript;

// Re-export commonly used types at the crate root
pub use agent::{AgentPipeline, HttpAgentPipeline, LoggingAgentPipeline, NoopAgentPipeline};
pub use api::{start_server, AppState, ServerError};
pub use bootstrap::{bootstrap_services, BridgeServices};
pub use config::{Config, QueueConfig, RecordingConfig, SttBackendKind, SttConfig, VadConfig};
pub use error::{BridgeError, BridgeResult};
pub use session::{MetricsSnapshot, SessionMetrics, SessionRegistry, SubscriberHandle};
pub use stt::{HallucinationFilter, RawTranscription, SttBackend, SttOutcome};
pub use transcript::{Segment, SessionOutbound, SpeakerRole, SubscriberFilter, Transcript};

/// Application name used in the health endpoint and logs.
pub const APP_NAME: &str = "VoxBridge";

/// Service identifier returned by the `/health` probe.
pub const SERVICE_ID: &str = "voxbridge";
