//! Status stream: one WebSocket per hub subscriber.

use std::{sync::Arc, time::Duration};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt},
    tracing::{debug, trace, warn},
};

use courier_protocol::PING_INTERVAL_MS;

use crate::state::GatewayState;

/// Forward status frames to `socket` until either side goes away.
///
/// The first frame is the hub's snapshot of the current state. Incoming text
/// is ignored; the stream is read-only.
pub async fn handle_subscriber(socket: WebSocket, state: Arc<GatewayState>) {
    let mut subscription = state.session.subscribe();
    let sub_id = subscription.id();
    debug!(subscriber = %sub_id, "status subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut ping = tokio::time::interval(Duration::from_millis(PING_INTERVAL_MS));
    ping.tick().await;

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                // None: the hub dropped this subscriber (full or closed outbox).
                let Some(frame) = frame else {
                    debug!(subscriber = %sub_id, "subscriber dropped by hub");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize status frame");
                        continue;
                    },
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            },
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                trace!(subscriber = %sub_id, "sent ping");
            },
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {},
                    Some(Err(e)) => {
                        debug!(subscriber = %sub_id, error = %e, "websocket read error");
                        break;
                    },
                }
            },
        }
    }

    debug!(subscriber = %sub_id, "status subscriber disconnected");
}
