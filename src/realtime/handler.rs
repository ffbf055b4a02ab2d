//! WebSocket Handler
//!
//! Upgrades `/ws` requests and runs one client connection: a send loop
//! draining the client's outbox and a receive loop applying control
//! messages. Whichever finishes first ends the other.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::hub::ClientHub;
use super::messages::{ClientMessage, ServerMessage};
use crate::api::AppState;

/// GET /ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<ClientHub>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let client_id = match hub.register(tx).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "Rejecting WebSocket client");
            if let Ok(text) = serde_json::to_string(&ServerMessage::error(e.to_string())) {
                let _ = sender.send(Message::Text(text)).await;
            }
            let _ = sender.close().await;
            return;
        }
    };

    if let Err(e) = hub
        .send_to(&client_id, &ServerMessage::connected(&client_id))
        .await
    {
        warn!(client_id = %client_id, error = %e, "Failed to queue connection notice");
    }

    let send_id = client_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text)).await.is_err() {
                debug!(client_id = %send_id, "WebSocket send failed, closing connection");
                break;
            }
        }
        let _ = sender.close().await;
    });

    let recv_hub = Arc::clone(&hub);
    let recv_id = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(message) => {
                    if !handle_ws_message(&recv_hub, &recv_id, message).await {
                        break;
                    }
                }
                Err(e) => {
                    debug!(client_id = %recv_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(&client_id).await;
}

/// Returns false when the connection should close
async fn handle_ws_message(hub: &ClientHub, client_id: &str, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => handle_client_message(hub, client_id, message).await,
                Err(e) => {
                    debug!(client_id = %client_id, error = %e, "Invalid client message");
                    let reply = ServerMessage::error(format!("Invalid message format: {}", e));
                    let _ = hub.send_to(client_id, &reply).await;
                }
            }
            true
        }
        Message::Binary(_) => {
            let reply = ServerMessage::error("Binary messages not supported");
            let _ = hub.send_to(client_id, &reply).await;
            true
        }
        // axum answers pings itself
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            debug!(client_id = %client_id, "Client requested close");
            false
        }
    }
}

async fn handle_client_message(hub: &ClientHub, client_id: &str, message: ClientMessage) {
    let reply = match message {
        ClientMessage::Subscribe {
            channels,
            message_id,
        } => match hub.subscribe(client_id, &channels).await {
            Ok(_) => ServerMessage::ack(message_id, true, None),
            Err(e) => ServerMessage::ack(message_id, false, Some(e.to_string())),
        },
        ClientMessage::Unsubscribe {
            channels,
            message_id,
        } => match hub.unsubscribe(client_id, &channels).await {
            Ok(_) => ServerMessage::ack(message_id, true, None),
            Err(e) => ServerMessage::ack(message_id, false, Some(e.to_string())),
        },
        ClientMessage::Ping => ServerMessage::pong(),
    };

    let _ = hub.send_to(client_id, &reply).await;
}
