//! WebSocket handler for the progress channel

use crate::commands::handle_frame;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use sift_channel::ServerMessage;
use sift_core::ProgressEvent;
use std::sync::Arc;

/// WebSocket upgrade handler
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

enum Incoming {
    Event(ProgressEvent),
    Frame(String),
    Ignored,
    Closed,
}

/// Relay hub events out and apply inbound commands until either side closes.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.hub.subscribe();
    let id = subscription.id;
    tracing::info!(subscriber = id, "Client connected");

    loop {
        let incoming = tokio::select! {
            event = subscription.events.recv() => match event {
                Some(event) => Incoming::Event(event),
                None => Incoming::Closed,
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => Incoming::Frame(text.as_str().to_string()),
                Some(Ok(Message::Close(_))) | None => Incoming::Closed,
                Some(Ok(_)) => Incoming::Ignored,
                Some(Err(e)) => {
                    tracing::debug!(subscriber = id, "Socket error: {}", e);
                    Incoming::Closed
                }
            },
        };

        let outbound: Option<ServerMessage> = match incoming {
            Incoming::Event(event) => Some(event.into()),
            Incoming::Frame(text) => {
                // Queued events predate the snapshot and would roll it back.
                handle_frame(&state.scheduler, &text, || {
                    let stale = subscription.discard_pending();
                    tracing::debug!(subscriber = id, stale, "Snapshot requested");
                })
                .map(ServerMessage::from)
            }
            Incoming::Ignored => None,
            Incoming::Closed => break,
        };

        if let Some(message) = outbound {
            if !send(&mut sender, &message).await {
                break;
            }
        }
    }

    state.hub.unsubscribe(id);
    tracing::info!(subscriber = id, "Client disconnected");
}

/// Returns false once the socket can no longer be written.
async fn send(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    match message.to_json() {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            tracing::warn!("Dropping unserializable message: {}", e);
            true
        }
    }
}
