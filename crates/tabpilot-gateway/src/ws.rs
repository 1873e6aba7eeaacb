use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::state::SharedState;
use crate::transport::Transport;

/// WebSocket upgrade handler for the browser extension.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    let limit = state.config.gateway.max_message_bytes;
    let transport = state.transport.clone();
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, transport))
}

async fn handle_socket(socket: WebSocket, transport: Arc<Transport>) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let peer_id = transport.attach(tx);

    // Ends when the transport drops this peer's sender, which also closes the socket.
    let send_task = tokio::spawn(async move {
        let outbound = UnboundedReceiverStream::new(rx)
            .map(|text| Ok::<_, axum::Error>(WsMessage::Text(text.into())));
        if let Err(e) = outbound.forward(ws_tx).await {
            debug!("peer {peer_id} send failed: {e}");
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => transport.dispatch(text.as_str()),
            Ok(WsMessage::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => transport.dispatch(text),
                Err(_) => warn!("peer {peer_id} sent a non-UTF-8 binary frame"),
            },
            Ok(WsMessage::Close(_)) => {
                debug!("peer {peer_id} sent close frame");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("websocket error on peer {peer_id}: {e}");
                break;
            }
        }
    }

    transport.detach(peer_id);
    send_task.abort();
}
