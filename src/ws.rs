//! WebSocket handshake classification and connection loops.
//!
//! A `chatFingerprint` query parameter makes a chat socket (mailbox push),
//! a `roomId` parameter makes a room socket (peer fan-out); `chatFingerprint`
//! wins when both are present, and a handshake with neither is accepted and
//! closed immediately.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::rooms::{destroyed_frame, JoinOutcome};
use crate::state::AppState;
use crate::totals::Total;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(rename = "roomId")]
    pub room_id: Option<String>,
    #[serde(rename = "chatFingerprint")]
    pub chat_fingerprint: Option<String>,
}

pub fn handle_upgrade(ws: WebSocketUpgrade, params: WsParams, state: AppState) -> Response {
    if let Some(fingerprint) = params.chat_fingerprint {
        return ws.on_upgrade(move |socket| chat_connection(socket, fingerprint, state));
    }
    if let Some(room_id) = params.room_id {
        return ws.on_upgrade(move |socket| room_connection(socket, room_id, state));
    }
    ws.on_upgrade(|mut socket| async move {
        let _ = socket.send(Message::Close(None)).await;
    })
}

/// True only for the exact burn control frame addressed to this room.
/// Anything else, unparseable JSON included, is opaque relay traffic.
fn is_burn_request(text: &str, room_id: &str) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return false;
    };
    value.get("type").and_then(Value::as_str) == Some("control")
        && value.get("action").and_then(Value::as_str) == Some("burnRoom")
        && value.get("roomId").and_then(Value::as_str) == Some(room_id)
}

async fn room_connection(mut socket: WebSocket, room_id: String, state: AppState) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let conn_id = match state.rooms.join(&room_id, tx).await {
        JoinOutcome::Burned => {
            let _ = socket.send(Message::Text(destroyed_frame(&room_id))).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        JoinOutcome::Joined { conn_id, created } => {
            if created {
                state.totals.increment(Total::RoomsCreated);
            }
            conn_id
        }
    };
    debug!(room = %room_id, conn = conn_id, "room socket joined");

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        let closing = matches!(frame, Message::Close(_));
                        if socket.send(frame).await.is_err() || closing {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if is_burn_request(&text, &room_id) {
                            state.rooms.burn(&room_id).await;
                        } else {
                            state
                                .rooms
                                .relay_from(&room_id, conn_id, Message::Text(text))
                                .await;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        state
                            .rooms
                            .relay_from(&room_id, conn_id, Message::Binary(data))
                            .await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    state.rooms.leave(&room_id, conn_id).await;
    debug!(room = %room_id, conn = conn_id, "room socket left");
}

async fn chat_connection(mut socket: WebSocket, fingerprint: String, state: AppState) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = state.chat_sockets.register(&fingerprint, tx).await;

    let hello = serde_json::json!({ "type": "connected", "fingerprint": fingerprint });
    if socket.send(Message::Text(hello.to_string())).await.is_err() {
        state.chat_sockets.unregister(&fingerprint, conn_id).await;
        return;
    }
    debug!(fingerprint = %fingerprint, conn = conn_id, "chat socket connected");

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if socket.send(frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(ids) = parse_ack(&text) {
                            state.mailboxes.ack(&fingerprint, &ids).await;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    state.chat_sockets.unregister(&fingerprint, conn_id).await;
    debug!(fingerprint = %fingerprint, conn = conn_id, "chat socket disconnected");
}

/// Extract message ids from an `{"type":"ack","messageIds":[...]}` frame.
fn parse_ack(text: &str) -> Option<Vec<String>> {
    let value = serde_json::from_str::<Value>(text).ok()?;
    if value.get("type").and_then(Value::as_str) != Some("ack") {
        return None;
    }
    let ids = value.get("messageIds").and_then(Value::as_array)?;
    Some(
        ids.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burn_request_requires_the_exact_shape() {
        assert!(is_burn_request(
            r#"{"type":"control","action":"burnRoom","roomId":"r1"}"#,
            "r1"
        ));
        // Wrong room, wrong action, non-JSON: all relayed instead.
        assert!(!is_burn_request(
            r#"{"type":"control","action":"burnRoom","roomId":"r2"}"#,
            "r1"
        ));
        assert!(!is_burn_request(
            r#"{"type":"control","action":"lockRoom","roomId":"r1"}"#,
            "r1"
        ));
        assert!(!is_burn_request("just ciphertext", "r1"));
        assert!(!is_burn_request(r#"{"type":"control"}"#, "r1"));
    }

    #[test]
    fn ack_frames_parse_and_others_do_not() {
        assert_eq!(
            parse_ack(r#"{"type":"ack","messageIds":["m1","m2"]}"#),
            Some(vec!["m1".to_string(), "m2".to_string()])
        );
        assert_eq!(parse_ack(r#"{"type":"ack"}"#), None);
        assert_eq!(parse_ack(r#"{"type":"hello"}"#), None);
        assert_eq!(parse_ack("not json"), None);
    }
}
