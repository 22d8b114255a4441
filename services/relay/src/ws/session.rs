//! Manages the WebSocket connection lifecycle for one relay session.

use super::{
    bridge::{BridgeSettings, ConnectionPair, Outbound},
    upstream::{self, UpstreamStream},
};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Entry point for a new local connection. Runs the bridge to completion.
#[instrument(name = "relay_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id: u32 = rand::random();
    tracing::Span::current().record("session_id", session_id);
    info!("Client connected to relay.");

    if let Err(e) = run_bridge(socket, state).await {
        error!(error = ?e, "Relay session terminated with error.");
    }
    info!("Relay session finished.");
}

enum LocalInput {
    Text(String),
    Closed,
    Ignored,
}

fn classify_local(frame: Option<Result<Message, axum::Error>>) -> LocalInput {
    match frame {
        Some(Ok(Message::Text(text))) => LocalInput::Text(text.as_str().to_owned()),
        Some(Ok(Message::Binary(data))) => {
            LocalInput::Text(String::from_utf8_lossy(&data).into_owned())
        }
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => LocalInput::Ignored,
        Some(Ok(Message::Close(_))) | None => LocalInput::Closed,
        Some(Err(e)) => {
            warn!(error = %e, "Error receiving from client WebSocket");
            LocalInput::Closed
        }
    }
}

enum UpstreamInput {
    Text(String),
    Error(String),
    Closed,
    Ignored,
}

fn classify_upstream(frame: Option<Result<WsMessage, tungstenite::Error>>) -> UpstreamInput {
    match frame {
        Some(Ok(WsMessage::Text(text))) => UpstreamInput::Text(text.as_str().to_owned()),
        Some(Ok(WsMessage::Binary(data))) => {
            UpstreamInput::Text(String::from_utf8_lossy(&data).into_owned())
        }
        Some(Ok(WsMessage::Close(_))) | None => UpstreamInput::Closed,
        Some(Ok(_)) => UpstreamInput::Ignored,
        Some(Err(e)) => UpstreamInput::Error(e.to_string()),
    }
}

/// The two write halves of a connection pair.
struct Links {
    local: SplitSink<WebSocket, Message>,
    upstream: Option<SplitSink<UpstreamStream, WsMessage>>,
}

impl Links {
    /// Performs the effects in order. Send failures are logged; the matching
    /// read half reports the closed link on its next poll.
    async fn apply(&mut self, effects: Vec<Outbound>) {
        for effect in effects {
            match effect {
                Outbound::Upstream(text) => match self.upstream.as_mut() {
                    Some(upstream) => {
                        if let Err(e) = upstream.send(WsMessage::Text(text.into())).await {
                            warn!(error = %e, "Failed to send message upstream");
                        }
                    }
                    None => warn!("Upstream link is not open; dropping message"),
                },
                Outbound::LocalText(text) => {
                    if let Err(e) = self.local.send(Message::Text(text.into())).await {
                        warn!(error = %e, "Failed to send text to client");
                    }
                }
                Outbound::LocalBinary(data) => {
                    if let Err(e) = self.local.send(Message::Binary(data)).await {
                        warn!(error = %e, "Failed to send audio to client");
                    }
                }
                Outbound::CloseLocal => {
                    let _ = self.local.close().await;
                }
                Outbound::CloseUpstream => {
                    if let Some(upstream) = self.upstream.as_mut() {
                        let _ = upstream.close().await;
                    }
                }
            }
        }
    }
}

/// Drives one `ConnectionPair` from connect to close.
///
/// There is no session limit; every accepted connection gets its own task and
/// its own upstream link.
async fn run_bridge(socket: WebSocket, state: Arc<AppState>) -> Result<()> {
    let config = state.config.clone();
    let (local_tx, mut local_rx) = socket.split();
    let mut links = Links {
        local: local_tx,
        upstream: None,
    };
    let mut pair = ConnectionPair::new(
        BridgeSettings::from(config.as_ref()),
        state.session.clone(),
        state.executor.clone(),
    );

    // Queue client messages while the upstream link opens.
    let connect = upstream::connect_with_timeout(&config);
    tokio::pin!(connect);
    let upstream_ws = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(ws) => break ws,
                Err(e) => {
                    let mut effects = pair.on_upstream_error(&format!("{e:#}"));
                    effects.extend(pair.on_upstream_closed());
                    links.apply(effects).await;
                    return Err(e);
                }
            },
            frame = local_rx.next() => {
                let effects = match classify_local(frame) {
                    LocalInput::Text(text) => pair.on_local_message(&text),
                    LocalInput::Closed => pair.on_local_closed(),
                    LocalInput::Ignored => continue,
                };
                links.apply(effects).await;
                if pair.is_terminated() {
                    return Ok(());
                }
            }
        }
    };

    let (upstream_tx, mut upstream_rx) = upstream_ws.split();
    links.upstream = Some(upstream_tx);
    let effects = pair.on_upstream_open()?;
    links.apply(effects).await;

    while !pair.is_terminated() {
        tokio::select! {
            frame = local_rx.next() => {
                let effects = match classify_local(frame) {
                    LocalInput::Text(text) => pair.on_local_message(&text),
                    LocalInput::Closed => pair.on_local_closed(),
                    LocalInput::Ignored => continue,
                };
                links.apply(effects).await;
            },
            frame = upstream_rx.next() => {
                let effects = match classify_upstream(frame) {
                    UpstreamInput::Text(text) => pair.on_upstream_message(&text)?,
                    UpstreamInput::Error(details) => pair.on_upstream_error(&details),
                    UpstreamInput::Closed => pair.on_upstream_closed(),
                    UpstreamInput::Ignored => continue,
                };
                links.apply(effects).await;
            },
        }
    }

    info!(state = ?pair.state(), "Connection pair shut down.");
    Ok(())
}
