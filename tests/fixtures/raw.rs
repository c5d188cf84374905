//! A frame-level client for protocol tests that need to send requests a
//! well-behaved `ClientSocket` never would (stale revisions, unknown
//! methods, proposals for undeclared replicants).

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

pub struct RawClient {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
    next_msgid: u64,
    /// Broadcasts observed while waiting for an ack.
    pub broadcasts: Vec<Value>,
}

impl RawClient {
    pub fn connect(socket: &Path) -> Self {
        let stream = UnixStream::connect(socket).expect("raw connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        let reader = BufReader::new(stream.try_clone().expect("clone"));
        Self {
            writer: stream,
            reader,
            next_msgid: 1,
            broadcasts: Vec::new(),
        }
    }

    /// Send an RPC and wait for its ack, collecting any broadcasts that
    /// arrive first.
    pub fn rpc(&mut self, event: &str, payload: Value) -> Value {
        let msgid = self.next_msgid;
        self.next_msgid += 1;
        self.send(serde_json::json!({
            "event": event,
            "msgid": msgid,
            "payload": payload
        }));

        loop {
            let frame = self.recv().expect("ack before disconnect");
            if frame["event"] == "ack" && frame["msgid"] == serde_json::json!(msgid) {
                return frame.get("payload").cloned().unwrap_or(Value::Null);
            }
            self.broadcasts.push(frame);
        }
    }

    /// Next frame that is not an ack, from the buffer or the wire.
    pub fn recv_broadcast(&mut self) -> Option<Value> {
        if !self.broadcasts.is_empty() {
            return Some(self.broadcasts.remove(0));
        }
        loop {
            let frame = self.recv()?;
            if frame["event"] != "ack" {
                return Some(frame);
            }
        }
    }

    /// True once the server has closed this connection; false when the
    /// read timeout elapses with the socket still open.
    pub fn wait_for_disconnect(&mut self) -> bool {
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => return true,
                Ok(_) => continue,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return false;
                }
                Err(_) => return true,
            }
        }
    }

    /// Fire a frame without waiting for any reply.
    pub fn send_frame(&mut self, frame: Value) {
        self.send(frame);
    }

    fn send(&mut self, frame: Value) {
        let mut line = frame.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).expect("send");
        self.writer.flush().expect("flush");
    }

    fn recv(&mut self) -> Option<Value> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => serde_json::from_str(line.trim_end()).ok(),
            Err(_) => None,
        }
    }
}
