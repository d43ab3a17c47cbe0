//! WebSocket front: one task per socket. A session is anonymous until its
//! first `JoinRoom` succeeds; afterwards every message is dispatched into the
//! bound room. Outgoing traffic flows exclusively through the session's hub
//! outbox so the engine never touches a socket.

pub mod hub;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use std::ops::ControlFlow;
use std::sync::Arc;

use crate::protocol::{ClientMsg, ServerMsg};
use crate::room::Room;
use crate::types::SessionId;
use crate::AppState;

const MAX_WS_MESSAGE_BYTES: usize = 32 * 1024;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), ()> {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json)).await.map_err(|_| ()),
        Err(err) => {
            tracing::error!("failed to serialize server message: {}", err);
            Ok(())
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (session, mut outbox) = state.hub.register();
    let mut room: Option<Arc<Room>> = None;

    loop {
        tokio::select! {
            queued = outbox.recv() => {
                match queued {
                    Some(msg) => {
                        if send_json(&mut sender, &msg).await.is_err() {
                            break;
                        }
                    }
                    // outbox dropped: superseded, overflowed, or kicked
                    None => break,
                }
            }
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_WS_MESSAGE_BYTES {
                            tracing::warn!("session {}: oversized message dropped", session);
                            break;
                        }
                        let msg: ClientMsg = match serde_json::from_str(&text) {
                            Ok(msg) => msg,
                            Err(err) => {
                                // framing error: the session dies, membership
                                // survives for a reconnect
                                tracing::warn!(
                                    "session {}: undecodable message ({})",
                                    session,
                                    err
                                );
                                break;
                            }
                        };
                        let flow =
                            dispatch(&state, &session, &mut room, &mut sender, msg).await;
                        if flow.is_break() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::debug!("session {}: socket error ({})", session, err);
                        break;
                    }
                }
            }
        }
    }

    state.hub.unregister(&session);
    if let Some(room) = room {
        room.handle_disconnect(&session).await;
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    session: &SessionId,
    room: &mut Option<Arc<Room>>,
    sender: &mut SplitSink<WebSocket, Message>,
    msg: ClientMsg,
) -> ControlFlow<()> {
    if let Some(bound) = room {
        bound.handle_command(session, msg).await;
        return ControlFlow::Continue(());
    }

    match msg {
        ClientMsg::JoinRoom {
            room_id,
            name,
            token,
            password,
        } => {
            let code = room_id.trim().to_lowercase();
            let Some(target) = state.rooms.get(&code) else {
                let _ = send_json(sender, &ServerMsg::InvalidRoomId {}).await;
                return ControlFlow::Break(());
            };

            match target
                .handle_join(session, &name, &token, password.as_deref())
                .await
            {
                Ok(()) => {
                    *room = Some(target);
                    ControlFlow::Continue(())
                }
                Err(err) => {
                    let _ = send_json(sender, &err.to_msg()).await;
                    if err.closes_session() {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    }
                }
            }
        }
        ClientMsg::CreateRoom {
            win_condition,
            creator_name,
            password,
        } => {
            match state
                .rooms
                .create(win_condition, creator_name, password)
                .await
            {
                Ok(room_state) => {
                    let _ = send_json(sender, &room_state).await;
                }
                Err(reason) => {
                    let _ = send_json(sender, &ServerMsg::ErrorMsg { reason }).await;
                }
            }
            ControlFlow::Continue(())
        }
        ClientMsg::Ping {} => ControlFlow::Continue(()),
        _ => {
            let _ = send_json(
                sender,
                &ServerMsg::ErrorMsg {
                    reason: "Join a room first".to_string(),
                },
            )
            .await;
            ControlFlow::Continue(())
        }
    }
}
