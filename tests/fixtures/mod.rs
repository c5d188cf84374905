//! Shared test fixtures: an in-process daemon on a tempdir socket.

#![allow(dead_code)]

pub mod raw;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use statecast::config::Config;
use statecast::server::{DaemonOptions, run_daemon};
use statecast::{ClientSocket, NamespaceId, ReplicantName, ReplicantOpts};

pub struct DaemonFixture {
    dir: tempfile::TempDir,
    socket: PathBuf,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl DaemonFixture {
    pub fn start() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("statecast.sock");
        let mut fixture = Self {
            dir,
            socket,
            handle: None,
        };
        fixture.start_daemon();
        fixture
    }

    pub fn start_daemon(&mut self) {
        assert!(self.handle.is_none(), "daemon already running");
        let options = DaemonOptions {
            socket: Some(self.socket.clone()),
            schema_root: Some(self.schema_root()),
            config: self.config(),
        };
        self.handle = Some(std::thread::spawn(move || {
            run_daemon(options).expect("daemon run");
        }));
        self.wait_for_socket();
    }

    /// Graceful stop, waiting for the final snapshots.
    pub fn stop_daemon(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Ok(client) = ClientSocket::connect(&self.socket) {
            let _ = client.shutdown_daemon();
        }
        handle.join().expect("daemon thread");
    }

    pub fn restart_daemon(&mut self) {
        self.stop_daemon();
        self.start_daemon();
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn client(&self) -> ClientSocket {
        ClientSocket::connect(&self.socket).expect("connect")
    }

    pub fn schema_root(&self) -> PathBuf {
        self.dir.path().join("schemas")
    }

    /// Install a schema file at `<schemas>/<namespace>/<name>.json`,
    /// picked up by the next declaration after a daemon (re)start.
    pub fn write_schema(&self, namespace: &str, name: &str, schema: &serde_json::Value) {
        let dir = self.schema_root().join(namespace);
        std::fs::create_dir_all(&dir).expect("schema dir");
        std::fs::write(
            dir.join(format!("{name}.json")),
            serde_json::to_string_pretty(schema).expect("schema json"),
        )
        .expect("schema write");
    }

    pub fn store_root(&self) -> PathBuf {
        self.dir.path().join("db").join("replicants")
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.logging.stdout = false;
        config.persistence.root = Some(self.store_root());
        // Keep test latencies low without defeating the throttle tests.
        config.persistence.default_interval_ms = 25;
        config
    }

    fn wait_for_socket(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(client) = ClientSocket::connect(&self.socket)
                && client.ping().is_ok()
            {
                return;
            }
            assert!(Instant::now() < deadline, "daemon did not come up");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for DaemonFixture {
    fn drop(&mut self) {
        self.stop_daemon();
    }
}

pub fn ns(s: &str) -> NamespaceId {
    NamespaceId::parse(s).expect("namespace")
}

pub fn name(s: &str) -> ReplicantName {
    ReplicantName::parse(s).expect("name")
}

pub fn opts_with_default(value: serde_json::Value) -> ReplicantOpts {
    ReplicantOpts {
        default_value: Some(value),
        ..ReplicantOpts::default()
    }
}

/// Poll until `f` holds or the timeout expires.
pub fn wait_until(timeout: Duration, f: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if f() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
