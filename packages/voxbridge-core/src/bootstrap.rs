//! Application bootstrap and dependency wiring.
//!
//! The composition root: the one place services are instantiated and wired
//! together. There is no module-level mutable state anywhere in the core;
//! everything hangs off the [`BridgeServices`] container built here.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentPipeline, HttpAgentPipeline, NoopAgentPipeline};
use crate::config::{Config, SttBackendKind};
use crate::error::{BridgeError, BridgeResult};
use crate::session::SessionRegistry;
use crate::stt::{BatchSttClient, SttBackend, StreamingSttClient};

/// Timeout for agent-pipeline HTTP submissions.
const AGENT_SUBMIT_TIMEOUT_SECS: u64 = 10;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BridgeServices {
    /// Owns every live session.
    pub registry: Arc<SessionRegistry>,
    /// Validated application configuration.
    pub config: Arc<Config>,
    /// Selected speech-to-text backend.
    pub stt: Arc<dyn SttBackend>,
    /// Downstream consumer of final transcripts.
    pub agent: Arc<dyn AgentPipeline>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl std::fmt::Debug for BridgeServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServices").finish_non_exhaustive()
    }
}

impl BridgeServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Starts background tasks (the idle-session sweeper).
    pub fn start_background_tasks(&self) {
        self.registry.spawn_idle_sweeper();
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Signal cancellation to pipeline workers, then close sessions so
        // subscribers get their session_ended frames.
        self.cancel_token.cancel();
        self.registry.shutdown().await;

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client used for batch STT and agent submissions.
fn create_http_client() -> BridgeResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(AGENT_SUBMIT_TIMEOUT_SECS))
        .build()
        .map_err(|e| BridgeError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order: configuration validation and the recordings directory
/// first (both fatal on boot), then shared infrastructure, then the STT
/// backend and agent pipeline, then the registry that depends on them.
///
/// # Errors
///
/// Returns `Configuration` errors for invalid settings or an unusable
/// recordings directory.
pub fn bootstrap_services(config: Config) -> BridgeResult<BridgeServices> {
    config
        .validate()
        .map_err(BridgeError::Configuration)?;

    if config.recording.enabled {
        std::fs::create_dir_all(&config.recording.dir).map_err(|e| {
            BridgeError::Configuration(format!(
                "Recordings directory {} is unusable: {}",
                config.recording.dir.display(),
                e
            ))
        })?;
    }

    let config = Arc::new(config);
    let http_client = create_http_client()?;
    let cancel_token = CancellationToken::new();

    let stt: Arc<dyn SttBackend> = match config.stt.backend {
        SttBackendKind::Batch => Arc::new(BatchSttClient::new(http_client.clone(), &config.stt)),
        SttBackendKind::Streaming => Arc::new(StreamingSttClient::new(&config.stt)),
    };
    log::info!("[Bootstrap] STT backend: {}", stt.name());

    let agent: Arc<dyn AgentPipeline> = match &config.agent_endpoint {
        Some(endpoint) => {
            log::info!("[Bootstrap] Agent pipeline endpoint: {}", endpoint);
            Arc::new(HttpAgentPipeline::new(http_client.clone(), endpoint.clone()))
        }
        None => {
            log::info!("[Bootstrap] No agent endpoint configured, transcripts stay local");
            Arc::new(NoopAgentPipeline)
        }
    };

    let registry = Arc::new(SessionRegistry::new(
        Arc::clone(&config),
        Arc::clone(&stt),
        Arc::clone(&agent),
        cancel_token.clone(),
    ));

    Ok(BridgeServices {
        registry,
        config,
        stt,
        agent,
        http_client,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;

    fn test_config(dir: std::path::PathBuf) -> Config {
        Config {
            recording: RecordingConfig { enabled: true, dir },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_creates_recordings_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("recordings");
        let services = bootstrap_services(test_config(dir.clone())).unwrap();
        assert!(dir.is_dir());
        assert_eq!(services.registry.session_count(), 0);
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_config() {
        let mut config = Config::default();
        config.queues.segments = 0;
        let err = bootstrap_services(config).unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }

    #[tokio::test]
    async fn bootstrap_rejects_unusable_recordings_dir() {
        let tmp = tempfile::tempdir().unwrap();
        // A file where the directory should be.
        let clash = tmp.path().join("recordings");
        std::fs::write(&clash, b"not a directory").unwrap();

        let err = bootstrap_services(test_config(clash)).unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }
}
