use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use uuid::Uuid;

use crate::api::{authorize_chat, AppState};
use crate::error::Result;
use crate::events::RoomEvent;
use crate::model::Room;
use crate::{auth, messages, reads, rooms};

/// Room subscription socket. The server pushes `message` and `receipt`
/// events; the client may send `message` and `read` frames. Frame failures
/// are surfaced back on the socket as `error` frames, never dropped.
pub async fn room_ws(
    State(state): State<AppState>,
    Extension(claims): Extension<auth::Claims>,
    Path(id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let room = {
        let conn = state.conn()?;
        let room = rooms::get_room(&conn, id)?;
        authorize_chat(&conn, &room, claims.sub)?;
        room
    };
    let sub = state.fanout.subscribe(room.id);
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, room, claims.sub, sub))
        .into_response())
}

/// Frames a connected client may send.
#[derive(Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
enum ClientFrame {
    Message { body: String },
    Read { message_id: i64 },
}

async fn handle_socket(
    stream: WebSocket,
    state: AppState,
    room: Room,
    actor: Uuid,
    sub: crate::events::Subscription,
) {
    let (mut sender, mut receiver) = stream.split();
    let mut rx = sub.into_stream();
    let hello = json!({ "t": "hello", "room_id": room.id }).to_string();
    if sender.send(WsMessage::Text(hello)).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            event = rx.next() => match event {
                Some(Ok(event)) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(error = %e, "event serialization failed");
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                    // the client fell behind the channel; tell it to close
                    // the gap with a history fetch
                    tracing::warn!(room = %room.id, missed, "subscriber lagged");
                    let reset = json!({ "t": "reset" }).to_string();
                    if sender.send(WsMessage::Text(reset)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Err(e) = handle_frame(&state, &room, actor, &text) {
                        let err = json!({ "t": "error", "error": e.code() }).to_string();
                        if sender.send(WsMessage::Text(err)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
}

fn handle_frame(state: &AppState, room: &Room, actor: Uuid, text: &str) -> Result<()> {
    let frame: ClientFrame = serde_json::from_str(text)
        .map_err(|_| crate::error::Error::validation("malformed_frame"))?;
    let conn = state.conn()?;
    match frame {
        ClientFrame::Message { body } => {
            state.fanout.publish_with(room.id, || {
                let message = messages::post_message(&conn, room, actor, &body)?;
                let event = RoomEvent::from(&message);
                Ok(((), Some(event)))
            })?;
        }
        ClientFrame::Read { message_id } => {
            state.fanout.publish_with(room.id, || {
                let advanced = reads::mark_read(&conn, room, actor, message_id)?;
                let event = advanced.map(|cursor| RoomEvent::Receipt {
                    room_id: room.id,
                    participant_id: actor,
                    last_read_message_id: cursor,
                });
                Ok(((), event))
            })?;
        }
    }
    Ok(())
}
