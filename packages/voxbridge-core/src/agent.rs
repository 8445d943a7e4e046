//! Downstream agent-pipeline contract.
//!
//! Every final transcript is submitted to the analysis pipeline through
//! [`AgentPipeline`]. The pipeline itself (context analysis, retrieval,
//! clarification generation) lives outside this crate; the core only knows
//! this one call. Submissions are fire-and-forget: failures are logged and
//! counted, never retried, and never block subscriber delivery.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::{BridgeError, BridgeResult};
use crate::transcript::SpeakerRole;

/// Consumer of final transcripts.
#[async_trait]
pub trait AgentPipeline: Send + Sync {
    /// Submits one final transcript for analysis.
    async fn submit(
        &self,
        session_id: &str,
        role: SpeakerRole,
        text: &str,
        language: &str,
    ) -> BridgeResult<()>;
}

/// Discards submissions. Used when no agent endpoint is configured.
pub struct NoopAgentPipeline;

#[async_trait]
impl AgentPipeline for NoopAgentPipeline {
    async fn submit(
        &self,
        session_id: &str,
        role: SpeakerRole,
        _text: &str,
        _language: &str,
    ) -> BridgeResult<()> {
        log::trace!("[Agent] Discarding transcript for {}/{}", session_id, role);
        Ok(())
    }
}

/// Logs submissions at debug level. Useful for development environments
/// where no pipeline is running.
pub struct LoggingAgentPipeline;

#[async_trait]
impl AgentPipeline for LoggingAgentPipeline {
    async fn submit(
        &self,
        session_id: &str,
        role: SpeakerRole,
        text: &str,
        language: &str,
    ) -> BridgeResult<()> {
        tracing::debug!(session_id, %role, language, text, "agent_submit");
        Ok(())
    }
}

/// Submission body sent to the configured endpoint.
#[derive(Serialize)]
struct SubmitBody<'a> {
    session_id: &'a str,
    speaker_role: SpeakerRole,
    text: &'a str,
    language: &'a str,
}

/// Posts each final transcript to an HTTP endpoint.
pub struct HttpAgentPipeline {
    http: Client,
    endpoint: String,
}

impl HttpAgentPipeline {
    /// Builds a pipeline client from the shared HTTP pool.
    #[must_use]
    pub fn new(http: Client, endpoint: String) -> Self {
        Self { http, endpoint }
    }
}

#[async_trait]
impl AgentPipeline for HttpAgentPipeline {
    async fn submit(
        &self,
        session_id: &str,
        role: SpeakerRole,
        text: &str,
        language: &str,
    ) -> BridgeResult<()> {
        let body = SubmitBody {
            session_id,
            speaker_role: role,
            text,
            language,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::Internal(format!("agent submit failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BridgeError::Internal(format!(
                "agent pipeline returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_pipeline_always_acks() {
        let pipeline = NoopAgentPipeline;
        assert!(pipeline
            .submit("s1", SpeakerRole::Technician, "bonjour", "fr")
            .await
            .is_ok());
    }

    #[test]
    fn submit_body_serializes_role_as_snake_case() {
        let body = SubmitBody {
            session_id: "s1",
            speaker_role: SpeakerRole::Technician,
            text: "bonjour",
            language: "fr",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["speaker_role"], "technician");
    }
}
