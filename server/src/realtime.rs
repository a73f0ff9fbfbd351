//! WebSocket session driver.
//!
//! One [`run_session`] call owns one upgraded socket for its whole life:
//!
//! - a writer task drains the connection's outbound queue into the socket,
//!   so frames leave in the order they were queued;
//! - the calling task reads client frames and feeds recognised signals to
//!   the [`ConnectionManager`].
//!
//! Whichever side stops first (client close, read error, end of stream,
//! write failure, server-initiated close) ends the session, and the
//! connection is disconnected exactly once.
//!
//! # Protocol
//!
//! All frames are JSON text of the form `{"event": ..., "data": ...}`.
//!
//! | Direction | Event | Data |
//! |-----------|-------|------|
//! | server → client | `connected` | `{"connection_id": "<uuid>"}` |
//! | client → server | `join_company_room` | empresa id (string or integer) |
//! | server → client | `joined_company_room` | `{"empresa_id": "<id>"}` |
//! | server → client | any published event | event payload, plus `emitted_at` |
//!
//! Malformed frames and unknown events are logged and ignored.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::connection::{ClientSignal, ConnectionManager, SignalError, OUTBOUND_CAPACITY};
use crate::types::{ClientFrame, ConnectionId, ServerFrame};

/// Drives one realtime connection until either side closes it.
pub async fn run_session(socket: WebSocket, connections: ConnectionManager) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut queue) = mpsc::channel::<ServerFrame>(OUTBOUND_CAPACITY);
    let id = connections.accept(outbound);

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            let Some(encoded) = frame.to_json() else {
                trace!(connection_id = %id, "Sending close frame");
                if let Err(err) = sender.send(Message::Close(None)).await {
                    debug!(connection_id = %id, error = %err, "Failed to send close frame");
                }
                break;
            };

            match encoded {
                Ok(json) => {
                    if let Err(err) = sender.send(Message::Text(json.into())).await {
                        debug!(connection_id = %id, error = %err, "Failed to write frame");
                        break;
                    }
                }
                Err(err) => {
                    error!(connection_id = %id, error = %err, "Failed to serialize frame");
                }
            }
        }
    });

    let reader = async {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => dispatch_text(&connections, id, text.as_str()),
                Ok(Message::Binary(data)) => {
                    debug!(connection_id = %id, len = data.len(), "Ignoring binary frame");
                }
                Ok(Message::Close(_)) => {
                    debug!(connection_id = %id, "Client sent close frame");
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // axum answers pings itself
                }
                Err(err) => {
                    debug!(connection_id = %id, error = %err, "WebSocket read error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        () = reader => {}
        _ = &mut writer => {
            trace!(connection_id = %id, "Writer finished");
        }
    }

    writer.abort();
    connections.disconnect(id);
}

/// Parses one text frame and dispatches the signal it carries.
///
/// Failures are logged and swallowed; the connection stays open.
fn dispatch_text(connections: &ConnectionManager, id: ConnectionId, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(connection_id = %id, error = %err, "Ignoring malformed realtime frame");
            return;
        }
    };

    let result =
        ClientSignal::try_from(frame).and_then(|signal| connections.handle_signal(id, signal));

    match result {
        Ok(_) => {}
        Err(err @ SignalError::UnknownSignal(_)) => {
            debug!(connection_id = %id, error = %err, "Ignoring unknown realtime event");
        }
        Err(err) => {
            warn!(connection_id = %id, error = %err, "Realtime signal rejected");
        }
    }
}
