//! HTTP/WebSocket server using Axum.

use crate::error::Result;
use crate::hub::{BroadcastHub, Connection};
use crate::protocol;
use crate::webhook;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use external_services::azure::SqlInventory;
use futures::{SinkExt, StreamExt};
use normalizer::{AlertAdapter, Normalizer, RuleStore};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared application state.
pub struct AppState {
    pub normalizer: Arc<Normalizer>,
    pub rule_store: Arc<dyn RuleStore>,
    pub hub: Arc<BroadcastHub>,
    pub inventory: Arc<dyn SqlInventory>,
    pub alerts: AlertAdapter,
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/webhook",
            post(webhook::post_webhook).get(webhook::get_webhook),
        )
        .route("/webhook-local", post(webhook::post_webhook_local))
        .route("/eventgrid", post(webhook::post_eventgrid))
        .route("/rules/reload", post(webhook::reload_rules))
        .route(
            "/resources/{subscription_id}/{resource_group_name}",
            get(webhook::list_resources),
        )
        .route("/health", get(webhook::health))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, hub: Arc<BroadcastHub>) {
    // Split the socket into sender and receiver
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (connection, mut rx) = hub.connect();
    let connection_id = connection.id;
    info!("Subscriber {} connected", connection_id);

    // Forward queued messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            biased;

            // Torn down by the hub (heartbeat failure or shutdown)
            _ = connection.closed() => break,

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) => {
                        connection.begin_close();
                        break;
                    }
                    Some(Ok(msg)) => {
                        if let Err(e) = handle_message(&connection, msg) {
                            warn!("Error handling message from {}: {:?}", connection_id, e);
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {:?}", connection_id, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    hub.unregister(&connection_id);
    send_task.abort();

    info!("Subscriber {} disconnected", connection_id);
}

/// Handle a single inbound frame.
fn handle_message(connection: &Connection, msg: Message) -> Result<()> {
    match msg {
        Message::Text(text) => {
            if protocol::is_heartbeat(text.as_str()) {
                connection.record_pong();
            }
            connection.send_text(protocol::echo_reply(text.as_str()))
        }
        Message::Binary(data) => {
            let text = String::from_utf8_lossy(&data);
            connection.send_text(protocol::echo_reply(&text))
        }
        Message::Ping(data) => {
            connection.record_pong();
            connection.send(Message::Pong(data))
        }
        Message::Pong(_) => {
            debug!("Pong from {}", connection.id);
            connection.record_pong();
            Ok(())
        }
        Message::Close(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;

    fn text_of(msg: Message) -> String {
        match msg {
            Message::Text(text) => text.as_str().to_string(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_text_frames_are_echoed() {
        let hub = BroadcastHub::new(HubConfig::default());
        let (connection, mut rx) = hub.connect();

        handle_message(&connection, Message::Text("ping".into())).unwrap();
        handle_message(&connection, Message::Text("pong".into())).unwrap();
        handle_message(&connection, Message::Text("hi there".into())).unwrap();

        assert_eq!(text_of(rx.recv().await.unwrap()), "ping");
        assert_eq!(text_of(rx.recv().await.unwrap()), "pong");
        assert_eq!(text_of(rx.recv().await.unwrap()), "Server received: hi there");
    }

    #[tokio::test]
    async fn test_pong_frame_records_liveness() {
        let hub = BroadcastHub::new(HubConfig::default());
        let (connection, mut rx) = hub.connect();
        let before = connection.last_pong_at();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        handle_message(&connection, Message::Pong(Vec::new().into())).unwrap();

        assert!(connection.last_pong_at() > before);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_frame_is_answered() {
        let hub = BroadcastHub::new(HubConfig::default());
        let (connection, mut rx) = hub.connect();

        handle_message(&connection, Message::Ping(vec![1, 2].into())).unwrap();

        match rx.recv().await.unwrap() {
            Message::Pong(data) => assert_eq!(&data[..], &[1, 2]),
            other => panic!("expected pong, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reply_to_closed_queue_is_an_error() {
        let hub = BroadcastHub::new(HubConfig::default());
        let (connection, rx) = hub.connect();
        drop(rx);

        assert!(handle_message(&connection, Message::Text("hello".into())).is_err());
    }
}
