use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::api::routes::AppState;

/// Axum handler that upgrades the HTTP connection to the ingestion
/// WebSocket.
pub async fn ingest_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ingest(socket, state))
}

/// Drive one ingestion connection.
///
/// Inbound text frames are telemetry events fed to the dispatcher;
/// outbound frames are the broadcast analyses of every connection's
/// events, so each client doubles as a subscriber. The loop ends when the
/// client closes or the send side fails.
async fn handle_ingest(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut analyses = state.dispatcher.subscribe();

    loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        // Malformed frames are dropped inside the
                        // dispatcher; the connection stays up.
                        let _ = state.dispatcher.process_raw(text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "Ingestion socket error");
                        break;
                    }
                }
            }

            analysis = analyses.recv() => {
                match analysis {
                    Ok(text) => {
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Subscriber lagged behind the analysis stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}
