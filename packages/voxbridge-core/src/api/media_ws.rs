//! Media gateway: the inbound telephony WebSocket.
//!
//! The provider opens one socket per call leg and sends framed JSON:
//! `connected`, `start` (stream id + custom parameters), `media` (base64
//! µ-law 8 kHz), `stop`, and `mark`/unknown events we ignore. One reader
//! task owns each socket; media handoff to the pipeline never blocks it.
//!
//! Media arriving before `start` is held briefly (provider frames can
//! arrive out of order on reconnects) and replayed once the direction is
//! bound; anything older than the grace window is dropped.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::AppState;
use crate::session::{CloseReason, Session};
use crate::transcript::SpeakerRole;

/// Incoming provider frame envelope.
#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum ProviderFrame {
    Connected,
    Start { start: StartPayload },
    Media { media: MediaPayload },
    Stop,
    Mark,
    #[serde(other)]
    Unknown,
}

/// `start` frame body.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartPayload {
    stream_sid: String,
    /// Carries `session_id` and `speaker_role` set by the call-control
    /// surface when the call was placed.
    #[serde(default)]
    custom_parameters: HashMap<String, String>,
}

/// `media` frame body.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaPayload {
    /// Base64 µ-law 8 kHz mono.
    payload: String,
    /// Provider-assigned millisecond timestamp; logged, not trusted.
    #[allow(dead_code)]
    #[serde(default)]
    timestamp: Option<String>,
}

/// The direction this socket feeds, once `start` has arrived.
struct BoundDirection {
    session: Arc<Session>,
    role: SpeakerRole,
}

/// WebSocket upgrade handler for the provider media stream.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_stream(socket, state))
}

/// Reader loop for one provider socket.
async fn handle_media_stream(socket: WebSocket, state: AppState) {
    let (_, mut receiver) = socket.split();
    let grace = Duration::from_millis(state.config.pending_media_grace_ms);

    let mut bound: Option<BoundDirection> = None;
    // Media received before `start`, with arrival times for the grace cut.
    let mut pending: VecDeque<(Instant, Bytes)> = VecDeque::new();
    let mut stopped = false;

    log::info!("[Media] Provider connection established");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let frame = match serde_json::from_str::<ProviderFrame>(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::warn!("[Media] Malformed provider frame, dropping: {}", e);
                        continue;
                    }
                };
                match frame {
                    ProviderFrame::Connected => {
                        log::debug!("[Media] Provider handshake frame");
                    }
                    ProviderFrame::Start { start } => {
                        match handle_start(&state, start) {
                            Some(direction) => {
                                replay_pending(&direction, &mut pending, grace);
                                bound = Some(direction);
                            }
                            None => break,
                        }
                    }
                    ProviderFrame::Media { media } => {
                        let payload = match BASE64.decode(media.payload.as_bytes()) {
                            Ok(bytes) => Bytes::from(bytes),
                            Err(e) => {
                                log::warn!("[Media] Undecodable media payload: {}", e);
                                continue;
                            }
                        };
                        match &bound {
                            Some(direction) => {
                                direction.session.ingest_media(direction.role, &payload);
                            }
                            None => {
                                // Hold for the grace window awaiting `start`.
                                let now = Instant::now();
                                pending.push_back((now, payload));
                                while let Some((arrived, _)) = pending.front() {
                                    if now.duration_since(*arrived) > grace {
                                        pending.pop_front();
                                        log::warn!(
                                            "[Media] Dropping media with no start frame"
                                        );
                                    } else {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    ProviderFrame::Stop => {
                        log::info!("[Media] Provider stop frame");
                        if let Some(direction) = bound.take() {
                            state
                                .registry
                                .close_direction(
                                    &direction.session.id,
                                    direction.role,
                                    CloseReason::ProviderStop,
                                )
                                .await;
                        }
                        stopped = true;
                        break;
                    }
                    ProviderFrame::Mark | ProviderFrame::Unknown => {}
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                log::warn!("[Media] Provider socket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Socket ended without a stop: tear the direction down as if one had
    // arrived.
    if let Some(direction) = bound.take() {
        if !stopped {
            state
                .registry
                .close_direction(
                    &direction.session.id,
                    direction.role,
                    CloseReason::SocketError,
                )
                .await;
        }
    }
    log::info!("[Media] Provider connection closed");
}

/// Resolves the `start` frame into a bound session direction.
///
/// Returns `None` when the direction cannot be bound; the caller drops the
/// socket (the provider will retry the leg).
fn handle_start(state: &AppState, start: StartPayload) -> Option<BoundDirection> {
    let session_id = start
        .custom_parameters
        .get("session_id")
        .cloned()
        .unwrap_or_else(|| start.stream_sid.clone());

    let role = start
        .custom_parameters
        .get("speaker_role")
        .and_then(|value| SpeakerRole::parse(value))
        .unwrap_or(SpeakerRole::Technician);

    log::info!(
        "[Media] Start: session {} direction {} (stream {})",
        session_id,
        role,
        start.stream_sid
    );

    match state.registry.open(&session_id, role, start.stream_sid) {
        Ok(session) => Some(BoundDirection { session, role }),
        Err(e) => {
            log::warn!("[Media] Rejecting start for {}/{}: {}", session_id, role, e);
            None
        }
    }
}

/// Feeds held pre-start media into the freshly bound direction, oldest
/// first, discarding anything beyond the grace window.
fn replay_pending(
    direction: &BoundDirection,
    pending: &mut VecDeque<(Instant, Bytes)>,
    grace: Duration,
) {
    let now = Instant::now();
    let mut replayed = 0usize;
    for (arrived, payload) in pending.drain(..) {
        if now.duration_since(arrived) > grace {
            continue;
        }
        direction.session.ingest_media(direction.role, &payload);
        replayed += 1;
    }
    if replayed > 0 {
        log::debug!("[Media] Replayed {} held media frame(s)", replayed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_frame_parses_stream_and_custom_parameters() {
        let json = r#"{
            "event": "start",
            "start": {
                "streamSid": "MZ123",
                "customParameters": {"session_id": "s1", "speaker_role": "agent"}
            }
        }"#;
        let frame: ProviderFrame = serde_json::from_str(json).unwrap();
        match frame {
            ProviderFrame::Start { start } => {
                assert_eq!(start.stream_sid, "MZ123");
                assert_eq!(start.custom_parameters["session_id"], "s1");
                assert_eq!(start.custom_parameters["speaker_role"], "agent");
            }
            _ => panic!("expected start frame"),
        }
    }

    #[test]
    fn media_frame_parses_base64_payload() {
        let json = r#"{"event":"media","media":{"payload":"//8=","timestamp":"1234"}}"#;
        let frame: ProviderFrame = serde_json::from_str(json).unwrap();
        match frame {
            ProviderFrame::Media { media } => {
                let decoded = BASE64.decode(media.payload.as_bytes()).unwrap();
                assert_eq!(decoded, vec![0xFF, 0xFF]);
            }
            _ => panic!("expected media frame"),
        }
    }

    #[test]
    fn unknown_events_fall_through_without_error() {
        let frame: ProviderFrame =
            serde_json::from_str(r#"{"event":"dtmf","digit":"5"}"#).unwrap();
        assert!(matches!(frame, ProviderFrame::Unknown));

        let frame: ProviderFrame = serde_json::from_str(r#"{"event":"mark"}"#).unwrap();
        assert!(matches!(frame, ProviderFrame::Mark));
    }

    #[test]
    fn stop_frame_parses_without_body() {
        let frame: ProviderFrame = serde_json::from_str(r#"{"event":"stop"}"#).unwrap();
        assert!(matches!(frame, ProviderFrame::Stop));
    }
}
