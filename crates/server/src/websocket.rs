//! WebSocket handling
//!
//! One connection per authenticated participant. The token is checked
//! before upgrade; unauthenticated connections are rejected with 401.
//! Broadcasts reach a connection through a per-connection forwarder
//! channel registered with the hub, so room fan-out and direct replies
//! share one ordered outbound stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use deskline_protocol::{ClientMessage, Role, ServerMessage};

use crate::auth::{Authenticator, Identity};
use crate::engine::ChatEngine;
use crate::error::ChatError;
use crate::hub::Member;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Shared context handed to every connection.
pub struct AppContext {
    pub engine: Arc<ChatEngine>,
    pub auth: Arc<dyn Authenticator>,
}

#[derive(Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

/// Messages that can be sent through the WebSocket
enum OutboundMessage {
    /// JSON-serialized ServerMessage
    Json(ServerMessage),
    /// Raw pong response
    Pong(Bytes),
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(ctx): State<Arc<AppContext>>,
) -> Response {
    let identity = params
        .token
        .as_deref()
        .and_then(|token| ctx.auth.authenticate(token));

    match identity {
        Some(identity) => ws
            .on_upgrade(move |socket| handle_socket(socket, ctx, identity))
            .into_response(),
        None => {
            let err = ChatError::NotAuthenticated;
            warn!(
                component = "websocket",
                event = "ws.connection.unauthenticated",
                code = err.code(),
                "Rejected WebSocket connection without a valid token"
            );
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

/// Handle an authenticated WebSocket connection
async fn handle_socket(socket: WebSocket, ctx: Arc<AppContext>, identity: Identity) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        participant_id = %identity.id,
        role = ?identity.role,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Channel for sending messages to this client
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(100);

    // Spawn task to forward messages to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                OutboundMessage::Json(server_msg) => match serde_json::to_string(&server_msg) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        warn!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize server message"
                        );
                        continue;
                    }
                },
                OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    // Hub broadcasts land on their own channel and are forwarded into the
    // shared outbound stream; when the connection closes, the forwarder
    // exits and the hub prunes the closed sender on its next broadcast.
    let (broadcast_tx, mut broadcast_rx) = mpsc::channel::<ServerMessage>(256);
    let forward_outbound = outbound_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = broadcast_rx.recv().await {
            if forward_outbound
                .send(OutboundMessage::Json(msg))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let hub = ctx.engine.hub().clone();
    hub.broadcast_presence(&identity.id, identity.role, true)
        .await;

    // Handle incoming messages
    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(OutboundMessage::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        // Parse client message
        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.message.parse_failed",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = msg.len(),
                    "Failed to parse client message"
                );
                send_json(
                    &outbound_tx,
                    ServerMessage::Error {
                        code: "parse_error".into(),
                        message: e.to_string(),
                        chat_id: None,
                    },
                )
                .await;
                continue;
            }
        };

        handle_client_message(
            client_msg,
            &ctx,
            &identity,
            conn_id,
            &outbound_tx,
            &broadcast_tx,
        )
        .await;
    }

    // Cleanup: drop all room memberships and announce the participant offline
    hub.leave_all(conn_id);
    hub.broadcast_presence(&identity.id, identity.role, false)
        .await;

    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        participant_id = %identity.id,
        "WebSocket connection closed"
    );
    send_task.abort();
    forward_task.abort();
}

/// Send a ServerMessage through the outbound channel
async fn send_json(tx: &mpsc::Sender<OutboundMessage>, msg: ServerMessage) {
    let _ = tx.send(OutboundMessage::Json(msg)).await;
}

/// Reply with the error for a failed operation
async fn send_error(tx: &mpsc::Sender<OutboundMessage>, err: ChatError, chat_id: Option<String>) {
    send_json(tx, err.to_server_message(chat_id)).await;
}

async fn handle_client_message(
    msg: ClientMessage,
    ctx: &Arc<AppContext>,
    identity: &Identity,
    conn_id: u64,
    outbound_tx: &mpsc::Sender<OutboundMessage>,
    broadcast_tx: &mpsc::Sender<ServerMessage>,
) {
    let engine = &ctx.engine;

    match msg {
        ClientMessage::JoinChat { chat_id } => match engine.get_chat(identity, &chat_id).await {
            Ok(chat) => {
                engine.hub().join(
                    &chat_id,
                    Member {
                        conn_id,
                        participant_id: identity.id.clone(),
                        role: identity.role,
                        tx: broadcast_tx.clone(),
                    },
                );
                send_json(outbound_tx, ServerMessage::ChatSnapshot { chat }).await;
            }
            Err(e) => send_error(outbound_tx, e, Some(chat_id)).await,
        },

        ClientMessage::LeaveChat { chat_id } => {
            engine.hub().leave(&chat_id, conn_id);
        }

        ClientMessage::SubscribeList => {
            if identity.role != Role::Admin {
                send_error(outbound_tx, ChatError::NotAdmin, None).await;
                return;
            }
            engine.hub().subscribe_admins(Member {
                conn_id,
                participant_id: identity.id.clone(),
                role: identity.role,
                tx: broadcast_tx.clone(),
            });
            match engine.list_chats(identity, None).await {
                Ok(chats) => send_json(outbound_tx, ServerMessage::ChatsList { chats }).await,
                Err(e) => send_error(outbound_tx, e, None).await,
            }
        }

        ClientMessage::GetOrCreateChat => match engine.get_or_create_chat(identity).await {
            Ok(chat) => send_json(outbound_tx, ServerMessage::ChatSnapshot { chat }).await,
            Err(e) => send_error(outbound_tx, e, None).await,
        },

        ClientMessage::ListChats { status } => match engine.list_chats(identity, status).await {
            Ok(chats) => send_json(outbound_tx, ServerMessage::ChatsList { chats }).await,
            Err(e) => send_error(outbound_tx, e, None).await,
        },

        ClientMessage::GetChat { chat_id } => match engine.get_chat(identity, &chat_id).await {
            Ok(chat) => send_json(outbound_tx, ServerMessage::ChatSnapshot { chat }).await,
            Err(e) => send_error(outbound_tx, e, Some(chat_id)).await,
        },

        ClientMessage::SendMessage { chat_id, body } => {
            if let Err(e) = engine.send_message(identity, &chat_id, &body).await {
                send_error(outbound_tx, e, Some(chat_id)).await;
            }
        }

        ClientMessage::MarkRead { chat_id } => {
            if let Err(e) = engine.mark_read(identity, &chat_id).await {
                send_error(outbound_tx, e, Some(chat_id)).await;
            }
        }

        ClientMessage::ClaimChat { chat_id } => {
            if let Err(e) = engine.claim(identity, &chat_id).await {
                send_error(outbound_tx, e, Some(chat_id)).await;
            }
        }

        ClientMessage::TakeoverChat { chat_id } => {
            if let Err(e) = engine.takeover(identity, &chat_id).await {
                send_error(outbound_tx, e, Some(chat_id)).await;
            }
        }

        ClientMessage::ReleaseChat { chat_id } => {
            if let Err(e) = engine.release(identity, &chat_id).await {
                send_error(outbound_tx, e, Some(chat_id)).await;
            }
        }

        ClientMessage::ResolveChat { chat_id } => {
            if let Err(e) = engine.resolve(identity, &chat_id).await {
                send_error(outbound_tx, e, Some(chat_id)).await;
            }
        }

        ClientMessage::DeleteChat { chat_id } => {
            if let Err(e) = engine.delete(identity, &chat_id).await {
                send_error(outbound_tx, e, Some(chat_id)).await;
            }
        }

        ClientMessage::Typing { chat_id, started } => {
            // Fire-and-forget: errors are not worth a reply here
            if let Err(e) = engine.typing(identity, conn_id, &chat_id, started).await {
                debug!(
                    component = "websocket",
                    event = "ws.typing.rejected",
                    connection_id = conn_id,
                    chat_id = %chat_id,
                    error = %e,
                    "Typing relay rejected"
                );
            }
        }
    }
}
