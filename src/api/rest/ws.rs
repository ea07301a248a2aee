//! The concrete channel bridge: one websocket per session. Inbound frames are
//! decoded and handed to the dispatch engine; outbound events are drained from
//! the session's queue and written to the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::engine::dispatch;
use crate::error::DispatchError;
use crate::models::message::Inbound;
use crate::models::provider::SessionId;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session = SessionId::new();
    let (mut sink, mut stream) = socket.split();
    let outbound_rx = state.connect(session);

    info!(session = %session, "session connected");

    let send_task = tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(outbound_rx);
        while let Some(event) = events.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize outbound event");
                    continue;
                }
            };

            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // messages from one session are handled in arrival order
    while let Some(Ok(message)) = stream.next().await {
        let text = match decode_frame(message) {
            Some(Ok(text)) => text,
            Some(Err(err)) => {
                state.notify(&session, err.into_outbound());
                continue;
            }
            None => continue,
        };

        match serde_json::from_str::<Inbound>(&text) {
            Ok(inbound) => {
                if let Err(err) = dispatch::handle_message(&state, session, inbound) {
                    debug!(session = %session, error = %err, "message rejected");
                    state.notify(&session, err.into_outbound());
                }
            }
            Err(err) => {
                let invalid = DispatchError::InvalidInput(format!("malformed message: {err}"));
                state.notify(&session, invalid.into_outbound());
            }
        }
    }

    dispatch::handle_disconnect(&state, session);
    state.disconnect(&session);
    send_task.abort();

    info!(session = %session, "session disconnected");
}

/// Data frames must carry JSON text; a binary payload is malformed input and
/// is rejected to its sender. Control frames (ping/pong/close) belong to the
/// transport and carry no message.
fn decode_frame(message: Message) -> Option<Result<String, DispatchError>> {
    match message {
        Message::Text(text) => Some(Ok(text)),
        Message::Binary(_) => Some(Err(DispatchError::InvalidInput(
            "binary frames are not supported".to_string(),
        ))),
        _ => None,
    }
}
