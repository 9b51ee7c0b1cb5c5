// =============================================================================
// Distribution Endpoint - per-session WebSocket duplex pump
// =============================================================================
//
// Clients connect to `/ws/{client_id}` and drive their subscriptions with
// JSON control messages:
//   - `subscribe` / `unsubscribe` mutate the registry and are acknowledged
//     with `subscription_confirmed` / `unsubscription_confirmed`.
//   - `ping` is answered with `pong`, no registry mutation.
//
// Matching feed events arrive through the session's outbound queue and are
// serialized onto the socket here. On disconnect every subscription for the
// session is removed.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::protocol::{now_ms, ClientMessage, ServerMessage};
use crate::server::session::OutboundQueue;
use crate::server::state::AppState;

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade request. The client identifier is
/// part of the connection target and becomes the session id.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!(session = %client_id, "WebSocket connection accepted, upgrading");
    ws.on_upgrade(move |socket| handle_session(socket, state, client_id))
}

// =============================================================================
// Session pump
// =============================================================================

/// Manages a single session's connection lifecycle.
///
/// Runs two concurrent directions via `tokio::select!`:
///   1. **Outbound** - pop from the session's queue, serialize, send.
///   2. **Inbound** - parse control messages and delegate to the registry.
async fn handle_session(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let queue = state.register_session(&session_id);
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            out = queue.pop() => {
                match out {
                    Some(msg) => {
                        if send_message(&mut sender, &msg).await.is_err() {
                            debug!(session = %session_id, "WebSocket send failed, disconnecting");
                            break;
                        }
                    }
                    // Queue closed: this session id reconnected elsewhere.
                    None => {
                        info!(session = %session_id, "outbound queue closed, ending stale pump");
                        break;
                    }
                }
            }

            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_control(&state, &session_id, &queue, &text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(session = %session_id, error = %e, "failed to send Pong, disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!(session = %session_id, "WebSocket Pong received");
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(session = %session_id, "WebSocket binary message ignored");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(session = %session_id, "WebSocket Close frame received");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(session = %session_id, error = %e, "WebSocket receive error");
                        break;
                    }
                    None => {
                        info!(session = %session_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // A reconnect under the same id may already have registered a new queue
    // and replayed its subscriptions; only the current owner may clear the
    // registry. The replacement queue is inserted before the stale queue is
    // closed, so a stale pump always fails this check.
    let still_owner = state
        .session_queue(&session_id)
        .map_or(false, |current| Arc::ptr_eq(&current, &queue));

    if still_owner {
        let removed = state.registry.unsubscribe_all(&session_id);
        state.remove_session(&session_id, &queue);
        info!(
            session = %session_id,
            subscriptions_removed = removed,
            "session closed, cleanup complete"
        );
    } else {
        info!(session = %session_id, "stale session pump ended, registry untouched");
    }
    queue.close();
}

/// Handle one inbound control message.
///
/// Malformed messages are logged and discarded; the connection stays up.
fn handle_control(state: &AppState, session_id: &str, queue: &Arc<OutboundQueue>, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe {
            symbol, timeframes, ..
        }) => {
            let tfs: std::collections::BTreeSet<_> = timeframes.into_iter().collect();
            state.registry.subscribe(session_id, &symbol, tfs.clone());
            info!(session = %session_id, symbol = %symbol, timeframes = ?tfs, "subscribed");

            // Ack every request, even repeats: the subscription state is
            // deduplicated, the acknowledgment is not.
            queue.push(ServerMessage::SubscriptionConfirmed {
                symbol,
                timeframes: tfs.into_iter().collect(),
                timestamp: now_ms(),
            });
        }
        Ok(ClientMessage::Unsubscribe { symbol, .. }) => {
            state.registry.unsubscribe(session_id, &symbol);
            info!(session = %session_id, symbol = %symbol, "unsubscribed");

            queue.push(ServerMessage::UnsubscriptionConfirmed {
                symbol,
                timestamp: now_ms(),
            });
        }
        Ok(ClientMessage::Ping { .. }) => {
            queue.push(ServerMessage::Pong {
                timestamp: now_ms(),
            });
        }
        Err(e) => {
            warn!(
                session = %session_id,
                error = %e,
                "malformed control message discarded"
            );
        }
    }
}

async fn send_message<S>(sender: &mut S, msg: &ServerMessage) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            // Serialisation errors are not network errors; don't disconnect.
            warn!(error = %e, "failed to serialize outbound message");
            Ok(())
        }
    }
}
