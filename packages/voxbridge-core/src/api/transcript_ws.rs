//! Transcription push WebSocket (to the browser UI).
//!
//! Each connection subscribes to one session and receives transcription
//! frames matching its filter. The server confirms attachment with a
//! single `connected` frame, pushes `transcription` frames as they are
//! published, and ends with `session_ended` before closing. A subscriber
//! that cannot keep up loses its oldest frames and keeps going.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use crate::api::AppState;
use crate::error::BridgeError;
use crate::session::SubscriberHandle;
use crate::transcript::{SessionOutbound, SubscriberFilter};

/// Commands a subscriber may send; anything else is ignored.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SubscriberInbound {
    /// Adjusts which transcripts this subscriber receives.
    Filter(SubscriberFilter),
}

/// WebSocket upgrade handler for `/transcription/{session_id}`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, BridgeError> {
    // Attach before upgrading so unknown sessions fail with a clean 404.
    let handle = state
        .registry
        .subscribe(&session_id, SubscriberFilter::default())?;
    Ok(ws.on_upgrade(move |socket| handle_subscriber(socket, handle)))
}

/// Push loop for one subscriber.
async fn handle_subscriber(socket: WebSocket, mut handle: SubscriberHandle) {
    let (mut sender, mut receiver) = socket.split();
    let subscriber_id = uuid::Uuid::new_v4();

    log::info!(
        "[Subscriber] {} attached to session {}",
        subscriber_id,
        handle.session_id
    );

    let connected = SessionOutbound::Connected {
        session_id: handle.session_id.clone(),
    };
    if send_frame(&mut sender, &connected).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            outbound = handle.receiver.recv() => {
                match outbound {
                    Ok(SessionOutbound::Transcription(frame)) => {
                        if !handle.filter.matches(frame.speaker_role, frame.is_final) {
                            continue;
                        }
                        if send_frame(&mut sender, &SessionOutbound::Transcription(frame))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(ended @ SessionOutbound::SessionEnded { .. }) => {
                        let _ = send_frame(&mut sender, &ended).await;
                        break;
                    }
                    Ok(other) => {
                        if send_frame(&mut sender, &other).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Bounded per-subscriber loss; the session goes on.
                        log::warn!(
                            "[Subscriber] {} lagged, lost {} frame(s)",
                            subscriber_id,
                            missed
                        );
                        handle.metrics.record_subscriber_drops(missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(SubscriberInbound::Filter(filter)) =
                            serde_json::from_str(&text)
                        {
                            log::debug!(
                                "[Subscriber] {} updated filter",
                                handle.session_id
                            );
                            handle.filter = filter;
                        }
                        // Unrecognized frames from the browser are ignored.
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    let _ = sender.close().await;
    log::info!(
        "[Subscriber] {} detached from session {}",
        subscriber_id,
        handle.session_id
    );
}

/// Serializes and pushes one outbound frame.
async fn send_frame(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: &SessionOutbound,
) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_command_parses() {
        let json = r#"{"type":"filter","speaker_roles":["technician"],"include_interim":false}"#;
        let inbound: SubscriberInbound = serde_json::from_str(json).unwrap();
        let SubscriberInbound::Filter(filter) = inbound;
        assert!(!filter.include_interim);
        assert_eq!(filter.speaker_roles.len(), 1);
    }

    #[test]
    fn unrecognized_commands_fail_to_parse() {
        assert!(serde_json::from_str::<SubscriberInbound>(r#"{"type":"ping"}"#).is_err());
    }
}
