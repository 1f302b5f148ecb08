use crate::registry::{ChannelSubscriber, SharedMessage};
use crate::state::AppState;
use crate::stream::StreamMessage;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let (subscriber, mut rx) = ChannelSubscriber::channel(state.settings.subscriber_queue);
    let id = state.registry().add(Arc::new(subscriber));
    let send_timeout = state.settings.send_timeout;
    tracing::info!(subscriber = id, "Client connected to AI stream");

    let reason = match StreamMessage::connected().to_shared() {
        Ok(greeting) => match send_text(&mut socket, greeting, send_timeout).await {
            Ok(()) => forward(&mut socket, &mut rx, send_timeout).await,
            Err(reason) => reason,
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize greeting");
            "internal error"
        }
    };

    state.registry().remove(id);
    if reason == "stream stopped" {
        let _ = time::timeout(send_timeout, socket.send(Message::Close(None))).await;
    }
    tracing::info!(subscriber = id, reason, "Client disconnected");
}

/// Relays queued frames to the socket until either side goes away. Inbound
/// messages are ignored apart from close.
async fn forward(
    socket: &mut WebSocket,
    rx: &mut mpsc::Receiver<SharedMessage>,
    send_timeout: Duration,
) -> &'static str {
    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(text) => {
                    if let Err(reason) = send_text(socket, text, send_timeout).await {
                        return reason;
                    }
                }
                None => return "stream stopped",
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | None => return "client closed",
                Some(Ok(_)) => {}
                Some(Err(_)) => return "receive failed",
            },
        }
    }
}

async fn send_text(
    socket: &mut WebSocket,
    text: SharedMessage,
    send_timeout: Duration,
) -> Result<(), &'static str> {
    match time::timeout(send_timeout, socket.send(Message::Text(text.to_string()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err("send failed"),
        Err(_) => Err("send timed out"),
    }
}
