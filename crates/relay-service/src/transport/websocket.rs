//! WebSocket transport.
//!
//! `GET /ws` upgrades to a WebSocket carrying one JSON event per text frame.
//! Binary frames are answered with an `Invalid message` error. Closing the
//! socket (or any socket error) disconnects the session exactly once.

use crate::errors::RelayError;
use crate::hub::ConnectionHub;
use crate::protocol::decode_client_frame;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::Method,
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Router serving the client WebSocket endpoint with permissive CORS.
pub fn ws_router(hub: ConnectionHub) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

async fn ws_upgrade_handler(ws: WebSocketUpgrade, State(hub): State<ConnectionHub>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, hub))
}

/// Pump one socket until either side closes.
pub async fn serve_socket(socket: WebSocket, hub: ConnectionHub) {
    let (connection, mut outbound) = hub.open_connection();
    let connection_id = connection.connection_id();
    let (mut ws_tx, mut ws_rx) = socket.split();

    debug!(
        target: "relay.transport.ws",
        connection_id = %connection_id,
        "WebSocket connection started"
    );

    loop {
        tokio::select! {
            biased;

            event = outbound.recv() => {
                let Some(event) = event else {
                    // Connection actor is gone (hub shutting down)
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                let frame = match event.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(
                            target: "relay.transport.ws",
                            connection_id = %connection_id,
                            error = %e,
                            "Failed to encode outbound event"
                        );
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(frame)).await {
                    debug!(
                        target: "relay.transport.ws",
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to send frame, closing"
                    );
                    break;
                }
            }

            msg = ws_rx.next() => {
                let delivered = match msg {
                    Some(Ok(Message::Text(text))) => match decode_client_frame(&text) {
                        Ok(event) => connection.deliver(event).await,
                        Err(error) => connection.report_malformed(error).await,
                    },
                    Some(Ok(Message::Binary(_))) => {
                        connection
                            .report_malformed(RelayError::MalformedMessage(
                                "binary frames are not supported".to_string(),
                            ))
                            .await
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(()),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(
                            target: "relay.transport.ws",
                            connection_id = %connection_id,
                            "Client closed connection"
                        );
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(
                            target: "relay.transport.ws",
                            connection_id = %connection_id,
                            error = %e,
                            "WebSocket error"
                        );
                        break;
                    }
                };

                if delivered.is_err() {
                    break;
                }
            }
        }
    }

    if let Err(e) = connection.disconnect().await {
        debug!(
            target: "relay.transport.ws",
            connection_id = %connection_id,
            error = %e,
            "Connection actor already stopped"
        );
    }

    debug!(
        target: "relay.transport.ws",
        connection_id = %connection_id,
        "WebSocket connection ended"
    );
}
