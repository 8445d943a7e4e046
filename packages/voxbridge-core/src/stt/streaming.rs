//! Streaming speech-to-text over a provider WebSocket.
//!
//! One persistent outbound connection per session direction, opened lazily
//! on the first audio write. Binary frames carry 16 kHz PCM to the
//! provider; JSON text frames come back with interim and final results. A
//! background reader task forwards parsed results over a channel; a
//! keepalive task pings the provider during speech gaps so the connection
//! survives idle periods.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::SttConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::stt::{SttBackend, SttEvent, SttOutcome, SttStreamHandle, SttStreamWriter};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Capacity of the provider-result channel per stream.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Provider result frame.
#[derive(Debug, Deserialize)]
struct ProviderEvent {
    #[serde(default, alias = "transcript")]
    text: String,
    #[serde(default)]
    is_final: Option<bool>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    duration: Option<f64>,
}

/// Streaming transcription client.
pub struct StreamingSttClient {
    endpoint: String,
    api_key: Option<String>,
    model: Option<String>,
    connect_timeout: Duration,
    keepalive: Duration,
}

impl StreamingSttClient {
    /// Builds a client from the STT configuration.
    #[must_use]
    pub fn new(config: &SttConfig) -> Self {
        Self {
            endpoint: config.streaming_endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            keepalive: Duration::from_secs(config.keepalive_secs),
        }
    }

    /// Builds the provider URL with audio format and language parameters.
    fn session_url(&self, language: &str) -> String {
        let mut url = format!(
            "{}?encoding=linear16&sample_rate=16000&channels=1&interim_results=true&language={}",
            self.endpoint, language
        );
        if let Some(model) = &self.model {
            url.push_str("&model=");
            url.push_str(model);
        }
        url
    }
}

#[async_trait]
impl SttBackend for StreamingSttClient {
    async fn transcribe_batch(&self, _pcm_16k: &[u8], _language: &str) -> SttOutcome {
        SttOutcome::Fatal("streaming backend does not transcribe batch segments".to_string())
    }

    async fn open_stream(&self, language: &str) -> BridgeResult<SttStreamHandle> {
        let url = self.session_url(language);
        log::info!("[STT] Opening streaming session: {}", self.endpoint);

        let request = {
            use tokio_tungstenite::tungstenite::client::IntoClientRequest;
            let mut request = url
                .into_client_request()
                .map_err(|e| BridgeError::Stt(format!("invalid streaming URL: {}", e)))?;
            if let Some(key) = &self.api_key {
                let value = format!("Token {}", key)
                    .parse()
                    .map_err(|_| BridgeError::Stt("API key is not header-safe".to_string()))?;
                request.headers_mut().insert("Authorization", value);
            }
            request
        };

        let (ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| BridgeError::Stt("streaming connect timed out".to_string()))?
            .map_err(|e| BridgeError::Stt(format!("streaming connect failed: {}", e)))?;

        log::info!("[STT] Streaming session established");

        let (sink, mut source) = ws.split();
        let sink = Arc::new(Mutex::new(Some(sink)));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        // Reader: parse provider frames and forward results until the
        // socket ends. Dropping `event_tx` closes the consumer side.
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        let event = match serde_json::from_str::<ProviderEvent>(&text) {
                            Ok(e) => e,
                            Err(e) => {
                                log::warn!("[STT] Unparseable provider frame: {}", e);
                                continue;
                            }
                        };
                        if event.text.is_empty() {
                            continue;
                        }
                        let forwarded = event_tx
                            .send(SttEvent {
                                text: event.text,
                                is_final: event.is_final.unwrap_or(false),
                                confidence: event.confidence,
                                duration: event.duration,
                            })
                            .await;
                        if forwarded.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        log::info!("[STT] Provider closed the streaming session");
                        break;
                    }
                    Err(e) => {
                        log::warn!("[STT] Streaming socket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        // Keepalive: ping during delivery gaps so the provider does not
        // reap the connection between utterances.
        let ping_sink = Arc::clone(&sink);
        let keepalive_interval = self.keepalive;
        let keepalive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(keepalive_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick carries no ping
            loop {
                ticker.tick().await;
                let mut guard = ping_sink.lock().await;
                match guard.as_mut() {
                    Some(ws) => {
                        if ws.send(Message::Ping(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        });

        Ok(SttStreamHandle {
            writer: Box::new(StreamingWriter {
                sink,
                reader: Some(reader),
                keepalive: Some(keepalive),
            }),
            events: event_rx,
        })
    }

    fn name(&self) -> &'static str {
        "streaming-ws"
    }
}

/// Write half of an open provider session.
struct StreamingWriter {
    sink: Arc<Mutex<Option<WsSink>>>,
    reader: Option<tokio::task::JoinHandle<()>>,
    keepalive: Option<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl SttStreamWriter for StreamingWriter {
    async fn write(&mut self, pcm_16k: &[u8]) -> BridgeResult<()> {
        let mut guard = self.sink.lock().await;
        let Some(ws) = guard.as_mut() else {
            return Err(BridgeError::Stt("streaming session is closed".to_string()));
        };
        ws.send(Message::Binary(pcm_16k.to_vec().into()))
            .await
            .map_err(|e| BridgeError::Stt(format!("streaming write failed: {}", e)))
    }

    async fn close(mut self: Box<Self>) -> BridgeResult<()> {
        log::info!("[STT] Closing streaming session");

        if let Some(task) = self.keepalive.take() {
            task.abort();
        }

        // Taking the sink makes any concurrent writer see a closed session.
        let sink = self.sink.lock().await.take();
        if let Some(mut ws) = sink {
            let _ = ws.send(Message::Close(None)).await;
            let _ = ws.close().await;
        }

        // Let the reader drain the provider's flushed final results.
        if let Some(task) = self.reader.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
        Ok(())
    }
}

impl Drop for StreamingWriter {
    fn drop(&mut self) {
        if let Some(task) = self.reader.take() {
            task.abort();
        }
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
    }
}
