//! WebSocket transport: owns the socket, feeds inbound frames to the
//! caller as events, and drives the reconnect policy when the socket
//! drops. The caller pushes outbound `ClientMessage`s through a channel;
//! closing that channel shuts the transport down cleanly.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use deskline_protocol::{ClientMessage, ServerMessage};

use crate::backoff::MAX_ATTEMPTS;
use crate::connection::ConnectionTracker;
use crate::projection::SyncAction;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("gave up reconnecting after {0} attempts")]
    GaveUp(u32),
}

/// Events surfaced to the UI layer.
#[derive(Debug)]
pub enum ClientEvent {
    /// Socket is up. Carries the resync work the outage requires
    /// (re-join rooms, refetch the list).
    Connected { resync: Vec<SyncAction> },
    Message(ServerMessage),
    Disconnected { attempt: u32, retry_in: Duration },
    GaveUp,
}

pub struct Transport {
    url: String,
}

impl Transport {
    /// `base_url` is the server origin, e.g. `ws://127.0.0.1:4600`.
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            url: format!(
                "{}/ws?token={}",
                base_url.trim_end_matches('/'),
                urlencoding::encode(token)
            ),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run the connection loop until the command channel closes or the
    /// reconnect budget is exhausted.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<ClientMessage>,
        events: mpsc::Sender<ClientEvent>,
    ) -> Result<(), ClientError> {
        let mut tracker = ConnectionTracker::new();

        loop {
            match tokio_tungstenite::connect_async(&self.url).await {
                Ok((stream, _response)) => {
                    let resync = tracker.connected();
                    if events.send(ClientEvent::Connected { resync }).await.is_err() {
                        return Ok(());
                    }

                    let (mut ws_tx, mut ws_rx) = stream.split();
                    loop {
                        tokio::select! {
                            inbound = ws_rx.next() => match inbound {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str::<ServerMessage>(&text) {
                                        Ok(msg) => {
                                            if events.send(ClientEvent::Message(msg)).await.is_err() {
                                                return Ok(());
                                            }
                                        }
                                        Err(e) => {
                                            warn!(
                                                component = "transport",
                                                event = "transport.parse_failed",
                                                error = %e,
                                                "Dropping unparseable server frame"
                                            );
                                        }
                                    }
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(
                                        component = "transport",
                                        event = "transport.socket_error",
                                        error = %e,
                                        "WebSocket error"
                                    );
                                    break;
                                }
                                None => {
                                    debug!(
                                        component = "transport",
                                        event = "transport.socket_closed",
                                        "Server closed the connection"
                                    );
                                    break;
                                }
                            },
                            outbound = commands.recv() => match outbound {
                                Some(msg) => {
                                    let json = match serde_json::to_string(&msg) {
                                        Ok(json) => json,
                                        Err(e) => {
                                            warn!(
                                                component = "transport",
                                                event = "transport.serialize_failed",
                                                error = %e,
                                                "Dropping unserializable command"
                                            );
                                            continue;
                                        }
                                    };
                                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    let _ = ws_tx.send(Message::Close(None)).await;
                                    return Ok(());
                                }
                            },
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        component = "transport",
                        event = "transport.connect_failed",
                        error = %e,
                        "WebSocket connect failed"
                    );
                }
            }

            match tracker.dropped() {
                Some(delay) => {
                    let attempt = match tracker.state() {
                        crate::connection::ConnectionState::Reconnecting { attempt } => attempt,
                        _ => 0,
                    };
                    if events
                        .send(ClientEvent::Disconnected {
                            attempt,
                            retry_in: delay,
                        })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                    tokio::time::sleep(delay).await;
                }
                None => {
                    let _ = events.send(ClientEvent::GaveUp).await;
                    return Err(ClientError::GaveUp(MAX_ATTEMPTS));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_carries_encoded_token() {
        let transport = Transport::new("ws://127.0.0.1:4600/", "tok en+1");
        assert_eq!(transport.url(), "ws://127.0.0.1:4600/ws?token=tok%20en%2B1");
    }
}
