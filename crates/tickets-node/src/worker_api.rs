//! Worker registration over WebSocket.
//!
//! - `/ws/register` upgrades the request into a worker connection. Each
//!   binary message carries one envelope; text messages are ignored.
//! - `/ws/status` lists the registered workers and their request statistics.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};
use std::net::SocketAddr;
use tickets_dispatch::WorkerConnection;
use tracing::debug;

use crate::api::AppState;

/// Create the worker routes.
pub fn worker_routes() -> Router<AppState> {
    Router::new()
        .route("/ws/register", get(register_handler))
        .route("/ws/status", get(status_handler))
}

/// WebSocket upgrade handler.
async fn register_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(state.connection.max_frame_bytes)
        .on_upgrade(move |socket| attach_worker(socket, remote.to_string(), state))
}

/// Turn an upgraded socket into a registered worker connection.
async fn attach_worker(socket: WebSocket, address: String, state: AppState) {
    let (sink, stream) = socket.split();

    let sink =
        sink.with(|frame: Bytes| future::ready(Ok::<_, axum::Error>(Message::Binary(frame))));

    let peer = address.clone();
    let stream = stream
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(move |message| {
            let frame = match message {
                Ok(Message::Binary(data)) => Some(Ok(data)),
                Ok(Message::Text(_)) => {
                    debug!(worker = %peer, "Text message ignored");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            };
            future::ready(frame)
        });

    WorkerConnection::open(
        address,
        sink,
        stream,
        state.connection.clone(),
        state.dispatcher.coordinator(),
    );
}

/// Registered workers in registry order.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.dispatcher.coordinator().status().await)
}
