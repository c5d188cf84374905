//! Daemon socket lifecycle.
//!
//! Three kinds of threads:
//! - acceptor (caller's thread): accepts connections, spawns handlers
//! - state thread: owns the Replicator, processes requests sequentially
//! - per-connection reader/writer threads: frame decode and outbound fan-out

use std::io::{BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::channel::{Receiver, Sender};

use crate::api::DaemonInfo;
use crate::config::Config;
use crate::server::replicator::{ConnHandle, Replicator};
use crate::server::state_loop::{StateMessage, run_state_loop};
use crate::transport::{ConnId, IpcError, read_frame};

pub struct DaemonOptions {
    pub socket: Option<PathBuf>,
    pub schema_root: Option<PathBuf>,
    pub config: Config,
}

/// Run the daemon in the current process. Returns after a shutdown
/// signal or a `shutdown` RPC, once the final snapshots are written.
pub fn run_daemon(opts: DaemonOptions) -> crate::Result<()> {
    let socket = opts.socket.unwrap_or_else(crate::paths::socket_path);
    let meta_path = socket.with_extension("meta.json");

    if let Some(dir) = socket.parent() {
        std::fs::create_dir_all(dir).map_err(IpcError::from)?;
    }

    // If another daemon is already listening, exit quietly.
    if UnixStream::connect(&socket).is_ok() {
        tracing::warn!("daemon already running on {:?}", socket);
        return Ok(());
    }

    // Remove stale socket file.
    let _ = std::fs::remove_file(&socket);

    let listener = UnixListener::bind(&socket).map_err(IpcError::from)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&socket, std::fs::Permissions::from_mode(0o600));
    }
    tracing::info!("daemon listening on {:?}", socket);

    let meta = DaemonInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol_version: crate::api::PROTOCOL_VERSION,
        pid: std::process::id(),
    };
    let _ = std::fs::write(
        &meta_path,
        serde_json::to_vec(&meta).unwrap_or_else(|_| b"{}".to_vec()),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone());
        let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone());
    }

    let max_frame_bytes = opts.config.limits.max_frame_bytes;
    let replicator = Replicator::new(&opts.config, opts.schema_root);
    let (tx, rx) = crossbeam::channel::unbounded::<StateMessage>();

    let state_handle = std::thread::spawn(move || {
        run_state_loop(replicator, rx);
    });

    let next_conn = AtomicU64::new(1);
    listener.set_nonblocking(true).map_err(IpcError::from)?;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown signal received");
            break;
        }
        if state_handle.is_finished() {
            // The state thread exits on a `shutdown` RPC.
            break;
        }

        match listener.accept() {
            Ok((stream, _)) => {
                let conn = next_conn.fetch_add(1, Ordering::Relaxed);
                let tx = tx.clone();
                std::thread::spawn(move || {
                    let _ = stream.set_nonblocking(false);
                    handle_connection(stream, conn, tx, max_frame_bytes);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            Err(e) => {
                tracing::error!("accept error: {}", e);
            }
        }
    }

    // Ask the state thread to flush and exit cleanly.
    let _ = tx.send(StateMessage::Shutdown);
    drop(tx);
    let _ = state_handle.join();

    let _ = std::fs::remove_file(&socket);
    let _ = std::fs::remove_file(&meta_path);
    tracing::info!("daemon stopped");
    Ok(())
}

/// Per-connection reader loop plus its writer thread.
fn handle_connection(
    stream: UnixStream,
    conn: ConnId,
    tx: Sender<StateMessage>,
    max_frame_bytes: usize,
) {
    let writer_stream = match stream.try_clone() {
        Ok(clone) => clone,
        Err(e) => {
            tracing::warn!(conn, "connection setup failed: {e}");
            return;
        }
    };
    let control_stream = stream.try_clone().ok();

    let (out_tx, out_rx) = crossbeam::channel::unbounded::<String>();
    let writer = std::thread::spawn(move || run_writer(writer_stream, out_rx));

    if tx
        .send(StateMessage::Connected {
            conn,
            handle: ConnHandle {
                sender: out_tx,
                stream: control_stream,
            },
        })
        .is_err()
    {
        return;
    }

    let mut reader = BufReader::new(stream);
    loop {
        match read_frame(&mut reader, max_frame_bytes) {
            Ok(Some(envelope)) => {
                if tx.send(StateMessage::Frame { conn, envelope }).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(conn, "read failed: {e}");
                break;
            }
        }
    }

    let _ = tx.send(StateMessage::Disconnected { conn });
    let _ = writer.join();
}

fn run_writer(mut stream: UnixStream, rx: Receiver<String>) {
    for mut frame in rx {
        frame.push('\n');
        if stream.write_all(frame.as_bytes()).is_err() {
            break;
        }
        if stream.flush().is_err() {
            break;
        }
    }
}
