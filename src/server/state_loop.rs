//! The state thread: the single serialization point.
//!
//! Owns the Replicator and processes messages sequentially, so no lock
//! guards any replicant state. `crossbeam::select!` multiplexes inbound
//! frames against the save scheduler's next deadline. Every drained
//! message is one "tick": queued local mutations flush once at its end.

use std::ops::ControlFlow;
use std::time::Instant;

use crossbeam::channel::Receiver;
use serde_json::json;

use crate::api::{DaemonInfo, DeclareRequest, ProposeRequest, ReadRequest, events};
use crate::server::replicator::{ConnHandle, Replicator};
use crate::transport::{ConnId, Envelope};

/// Message from socket handler threads to the state thread.
pub enum StateMessage {
    Connected { conn: ConnId, handle: ConnHandle },
    Frame { conn: ConnId, envelope: Envelope },
    Disconnected { conn: ConnId },
    /// Signal-initiated shutdown; frames may also request it.
    Shutdown,
}

/// Run the state loop until shutdown. Writes a final snapshot for every
/// persistent replicant before returning.
pub fn run_state_loop(mut replicator: Replicator, rx: Receiver<StateMessage>) {
    loop {
        let timer = match replicator.next_save_deadline() {
            Some(deadline) => {
                crossbeam::channel::after(deadline.saturating_duration_since(Instant::now()))
            }
            None => crossbeam::channel::never(),
        };

        let flow = crossbeam::select! {
            recv(rx) -> msg => match msg {
                Ok(msg) => handle_message(&mut replicator, msg),
                Err(_) => ControlFlow::Break(()),
            },
            recv(timer) -> _ => {
                replicator.run_due_saves(Instant::now());
                ControlFlow::Continue(())
            }
        };

        // End of tick: coalesced local mutations produce at most one
        // broadcast per replicant.
        replicator.flush_pending();

        if flow.is_break() {
            break;
        }
    }
    replicator.save_all();
}

fn handle_message(replicator: &mut Replicator, msg: StateMessage) -> ControlFlow<()> {
    match msg {
        StateMessage::Connected { conn, handle } => {
            tracing::debug!(conn, "client connected");
            replicator.connect(conn, handle);
            ControlFlow::Continue(())
        }
        StateMessage::Disconnected { conn } => {
            tracing::debug!(conn, "client disconnected");
            replicator.disconnect(conn);
            ControlFlow::Continue(())
        }
        StateMessage::Frame { conn, envelope } => handle_frame(replicator, conn, envelope),
        StateMessage::Shutdown => ControlFlow::Break(()),
    }
}

fn handle_frame(replicator: &mut Replicator, conn: ConnId, envelope: Envelope) -> ControlFlow<()> {
    // A denied event is treated as if it were never received.
    if !replicator.allow(&envelope.event, conn) {
        tracing::debug!(conn, event = %envelope.event, "event denied by access policy");
        return ControlFlow::Continue(());
    }

    match envelope.event.as_str() {
        events::DECLARE => {
            let Some(request) = decode::<DeclareRequest>(conn, &envelope) else {
                return ControlFlow::Continue(());
            };
            let reply = replicator.declare_remote(conn, request);
            ack(replicator, conn, &envelope, serde_json::to_value(reply).ok());
        }
        events::PROPOSE_OPERATIONS => {
            let Some(request) = decode::<ProposeRequest>(conn, &envelope) else {
                return ControlFlow::Continue(());
            };
            match replicator.handle_propose(Some(conn), request) {
                Ok(reply) => {
                    ack(replicator, conn, &envelope, serde_json::to_value(reply).ok());
                }
                Err(err) => {
                    // Proposing against an undeclared replicant is a
                    // protocol error; sever the socket.
                    tracing::warn!(conn, %err, "protocol error, disconnecting");
                    replicator.disconnect(conn);
                }
            }
        }
        events::READ => {
            let Some(request) = decode::<ReadRequest>(conn, &envelope) else {
                return ControlFlow::Continue(());
            };
            let value = replicator.handle_read(&request);
            ack(replicator, conn, &envelope, Some(value));
        }
        events::PING => {
            let info = DaemonInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                protocol_version: crate::api::PROTOCOL_VERSION,
                pid: std::process::id(),
            };
            ack(replicator, conn, &envelope, serde_json::to_value(info).ok());
        }
        events::SHUTDOWN => {
            ack(replicator, conn, &envelope, Some(json!({"ok": true})));
            tracing::info!(conn, "shutdown requested");
            return ControlFlow::Break(());
        }
        other => {
            tracing::warn!(conn, event = %other, "unknown event ignored");
        }
    }
    ControlFlow::Continue(())
}

fn decode<T: serde::de::DeserializeOwned>(conn: ConnId, envelope: &Envelope) -> Option<T> {
    match serde_json::from_value(envelope.payload.clone()) {
        Ok(request) => Some(request),
        Err(err) => {
            tracing::warn!(conn, event = %envelope.event, %err, "malformed payload ignored");
            None
        }
    }
}

fn ack(
    replicator: &Replicator,
    conn: ConnId,
    request: &Envelope,
    payload: Option<serde_json::Value>,
) {
    let Some(msgid) = request.msgid else {
        return;
    };
    let payload = payload.unwrap_or(serde_json::Value::Null);
    replicator.send_to(conn, &Envelope::ack(msgid, payload));
}
