//! Transport binding: ndjson envelopes over a Unix socket, with named
//! rooms for multicast and `msgid`-matched acknowledgements.
//!
//! Frame format: one JSON document per line,
//! `{"event": "...", "msgid": 7, "payload": {...}}\n`. RPCs carry a
//! `msgid`; the reply travels as `{"event": "ack", "msgid": 7, ...}`.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::Transience;

/// Daemon-local connection identifier.
pub type ConnId = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msgid: Option<u64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            msgid: None,
            payload,
        }
    }

    pub fn rpc(event: impl Into<String>, msgid: u64, payload: Value) -> Self {
        Self {
            event: event.into(),
            msgid: Some(msgid),
            payload,
        }
    }

    pub fn ack(msgid: u64, payload: Value) -> Self {
        Self {
            event: crate::api::events::ACK.into(),
            msgid: Some(msgid),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("socket io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {len} bytes exceeds limit {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("frame decode failed: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("frame encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("no acknowledgement within {timeout_ms}ms")]
    AckTimeout { timeout_ms: u64 },
}

impl IpcError {
    pub fn transience(&self) -> Transience {
        match self {
            IpcError::Io(_) | IpcError::AckTimeout { .. } => Transience::Retryable,
            IpcError::FrameTooLarge { .. } | IpcError::Decode(_) | IpcError::Encode(_) => {
                Transience::Permanent
            }
        }
    }
}

pub fn encode_frame(envelope: &Envelope) -> Result<String, IpcError> {
    serde_json::to_string(envelope).map_err(IpcError::Encode)
}

/// Read one frame. `Ok(None)` means a clean EOF.
pub fn read_frame(
    reader: &mut impl BufRead,
    max_frame_bytes: usize,
) -> Result<Option<Envelope>, IpcError> {
    let mut line = String::new();
    let n = reader.read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if line.len() > max_frame_bytes {
        return Err(IpcError::FrameTooLarge {
            len: line.len(),
            max: max_frame_bytes,
        });
    }
    let envelope = serde_json::from_str(line.trim_end()).map_err(IpcError::Decode)?;
    Ok(Some(envelope))
}

pub fn write_frame(writer: &mut impl Write, envelope: &Envelope) -> Result<(), IpcError> {
    let mut frame = encode_frame(envelope)?;
    frame.push('\n');
    writer.write_all(frame.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Multicast registry: room name to member connections.
///
/// Connections join no rooms by default; a declaration joins the socket
/// to its namespace room.
#[derive(Debug, Default)]
pub struct Rooms {
    rooms: BTreeMap<String, BTreeSet<ConnId>>,
}

impl Rooms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, room: &str, conn: ConnId) {
        self.rooms.entry(room.to_string()).or_default().insert(conn);
    }

    pub fn leave_all(&mut self, conn: ConnId) {
        self.rooms.retain(|_, members| {
            members.remove(&conn);
            !members.is_empty()
        });
    }

    pub fn contains(&self, room: &str, conn: ConnId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains(&conn))
    }

    /// Members of a room, excluding `except` when given.
    pub fn members(&self, room: &str, except: Option<ConnId>) -> Vec<ConnId> {
        self.rooms
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .copied()
                    .filter(|conn| Some(*conn) != except)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Gate individual events per connection. A denied event is dropped as
/// if it were never received.
pub trait AccessPolicy: Send {
    fn allow(&self, event: &str, conn: ConnId) -> bool;
}

pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn allow(&self, _event: &str, _conn: ConnId) -> bool {
        true
    }
}
