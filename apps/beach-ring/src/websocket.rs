use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use crate::registry::ConnectionId;
use crate::relay::{Relay, RelayError};
use crate::signaling::ClientMessage;

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(relay): State<Relay>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, relay, remote_addr))
}

/// Drive one WebSocket connection until it closes.
///
/// Frames are handled strictly in arrival order, and the relay is told about
/// the close exactly once whichever way the read loop ends.
pub async fn handle_socket(socket: WebSocket, relay: Relay, remote_addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, mut rx) = relay.attach();

    info!(
        connection_id = %connection_id,
        remote_addr = %remote_addr,
        "client connected"
    );

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "failed to encode server message"),
            }
        }
        debug!(connection_id = %connection_id, "writer task finished");
    });

    while let Some(msg_result) = receiver.next().await {
        let msg = match msg_result {
            Ok(m) => m,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "websocket error");
                break;
            }
        };

        match msg {
            Message::Text(text) => dispatch_frame(&relay, connection_id, text.as_bytes()),
            Message::Binary(data) => dispatch_frame(&relay, connection_id, &data),
            Message::Close(frame) => {
                debug!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            // axum answers pings itself
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let departure = relay.detach(connection_id);
    writer.abort();

    info!(
        connection_id = %connection_id,
        identity = ?departure.identity,
        partner = ?departure.partner,
        "client disconnected"
    );
}

fn dispatch_frame(relay: &Relay, connection_id: ConnectionId, frame: &[u8]) {
    let message = match serde_json::from_slice::<ClientMessage>(frame) {
        Ok(message) => message,
        Err(err) => {
            warn!(
                connection_id = %connection_id,
                error = %err,
                "dropping malformed client frame"
            );
            metrics::counter!("beach_ring_dropped_total", 1, "kind" => "malformed");
            return;
        }
    };

    let kind = message.kind();
    match relay.handle(connection_id, message) {
        Ok(()) => debug!(connection_id = %connection_id, kind, "event handled"),
        Err(err @ (RelayError::UnknownTarget(_) | RelayError::NotRegistered)) => {
            debug!(connection_id = %connection_id, kind, error = %err, "event dropped");
        }
        Err(err) => {
            debug!(connection_id = %connection_id, kind, error = %err, "event rejected");
        }
    }
}
