//! Batch speech-to-text over HTTP.
//!
//! Wraps each segment's 16 kHz PCM in an in-memory WAV container and
//! uploads it as multipart form data. The request deliberately carries no
//! initial prompt or hint: providers echo prompt formatting back as
//! hallucinated output on marginal audio.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use crate::audio::{wav_container, AudioFormat, TRANSCRIBE_SAMPLE_RATE};
use crate::config::SttConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::stt::{RawTranscription, SttBackend, SttOutcome, SttStreamHandle};

/// Provider response shape for a batch transcription.
#[derive(Debug, Deserialize)]
struct ProviderResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Option<Vec<ProviderSegment>>,
}

/// Per-segment detail in a provider response.
#[derive(Debug, Deserialize)]
struct ProviderSegment {
    #[serde(default)]
    confidence: Option<f32>,
}

/// HTTP batch transcription client.
pub struct BatchSttClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
    timeout: Duration,
}

impl BatchSttClient {
    /// Builds a client from the STT configuration and the shared HTTP pool.
    #[must_use]
    pub fn new(http: Client, config: &SttConfig) -> Self {
        Self {
            http,
            endpoint: config.batch_endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.batch_timeout_secs),
        }
    }

    /// Mean of the per-segment confidences, if the provider reported any.
    fn mean_confidence(segments: &Option<Vec<ProviderSegment>>) -> Option<f32> {
        let values: Vec<f32> = segments
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|s| s.confidence)
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

#[async_trait]
impl SttBackend for BatchSttClient {
    async fn transcribe_batch(&self, pcm_16k: &[u8], language: &str) -> SttOutcome {
        let wav = wav_container(pcm_16k, AudioFormat::mono_16bit(TRANSCRIBE_SAMPLE_RATE));

        let file = Part::bytes(wav.to_vec())
            .file_name("segment.wav")
            .mime_str("audio/wav")
            .expect("static mime type is valid");

        // No prompt / initial hint part. Ever.
        let mut form = Form::new()
            .part("file", file)
            .text("language", language.to_string());
        if let Some(model) = &self.model {
            form = form.text("model", model.clone());
        }

        let mut request = self.http.post(&self.endpoint).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.multipart(form).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return SttOutcome::Transient(format!("batch request failed: {}", e));
            }
            Err(e) => return SttOutcome::Fatal(format!("batch request failed: {}", e)),
        };

        let status = response.status();
        if status.is_server_error() {
            return SttOutcome::Transient(format!("provider returned {}", status));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return SttOutcome::Fatal(format!("provider returned {}: {}", status, body));
        }

        let parsed: ProviderResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => return SttOutcome::Fatal(format!("unparseable provider response: {}", e)),
        };

        SttOutcome::Transcribed(RawTranscription {
            confidence: Self::mean_confidence(&parsed.segments),
            text: parsed.text,
            language: parsed.language,
            duration: parsed.duration,
        })
    }

    async fn open_stream(&self, _language: &str) -> BridgeResult<SttStreamHandle> {
        Err(BridgeError::Configuration(
            "batch backend does not support streaming sessions".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "batch-http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_confidence_averages_reported_segments() {
        let segments = Some(vec![
            ProviderSegment {
                confidence: Some(0.8),
            },
            ProviderSegment { confidence: None },
            ProviderSegment {
                confidence: Some(0.6),
            },
        ]);
        let mean = BatchSttClient::mean_confidence(&segments).unwrap();
        assert!((mean - 0.7).abs() < 1e-6);
    }

    #[test]
    fn mean_confidence_is_none_without_segments() {
        assert!(BatchSttClient::mean_confidence(&None).is_none());
        assert!(BatchSttClient::mean_confidence(&Some(vec![])).is_none());
    }

    #[test]
    fn provider_response_parses_minimal_payload() {
        let parsed: ProviderResponse = serde_json::from_str(r#"{"text":"bonjour"}"#).unwrap();
        assert_eq!(parsed.text, "bonjour");
        assert!(parsed.language.is_none());
        assert!(parsed.segments.is_none());
    }

    #[tokio::test]
    async fn open_stream_is_a_configuration_error() {
        let client = BatchSttClient::new(Client::new(), &SttConfig::default());
        let err = client.open_stream("fr").await.unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }
}
