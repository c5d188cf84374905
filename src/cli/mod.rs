//! CLI surface for statecast.
//!
//! `statecast daemon run` starts the foreground daemon; the remaining
//! commands are thin clients over the daemon socket.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use serde_json::Value;

use crate::client::{ClientError, ClientSocket};
use crate::core::{NamespaceId, ReplicantName};
use crate::server::{DaemonOptions, run_daemon};
use crate::{Error, Result};

#[derive(Parser, Debug)]
#[command(
    name = "statecast",
    version,
    about = "Replicated state engine for broadcast graphics",
    infer_subcommands = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Daemon socket path (default: under the data dir).
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Compact machine-readable output.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Daemon control.
    #[command(subcommand)]
    Daemon(DaemonCommand),

    /// Read a replicant's current value.
    Read { namespace: String, name: String },

    /// Declare a replicant and assign it a JSON value.
    Assign {
        namespace: String,
        name: String,
        value: String,
    },

    /// Daemon health check.
    Ping,
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground.
    Run {
        /// Directory of replicant schemas (`<namespace>/<name>.json`).
        #[arg(long, value_name = "DIR")]
        schemas: Option<PathBuf>,
    },
    /// Ask a running daemon to flush and exit.
    Stop,
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn run(cli: Cli) -> Result<()> {
    let socket = cli.socket.clone().unwrap_or_else(crate::paths::socket_path);
    match cli.command {
        Commands::Daemon(DaemonCommand::Run { schemas }) => {
            let config = crate::config::load_or_default();
            run_daemon(DaemonOptions {
                socket: Some(socket),
                schema_root: schemas,
                config,
            })
        }
        Commands::Daemon(DaemonCommand::Stop) => {
            let client = connect(&socket)?;
            client.shutdown_daemon().map_err(Error::from)?;
            println!("daemon stopping");
            Ok(())
        }
        Commands::Read { namespace, name } => {
            let namespace = NamespaceId::parse(namespace)?;
            let name = ReplicantName::parse(name)?;
            let client = connect(&socket)?;
            let value = client.read(namespace, name).map_err(Error::from)?;
            print_value(&value, cli.json);
            Ok(())
        }
        Commands::Assign {
            namespace,
            name,
            value,
        } => {
            let namespace = NamespaceId::parse(namespace)?;
            let name = ReplicantName::parse(name)?;
            let value: Value =
                serde_json::from_str(&value).map_err(|e| Error::from(ClientError::Json(e)))?;
            let client = connect(&socket)?;
            let replicant =
                client.replicant(namespace, name, crate::api::ReplicantOpts::default())?;
            replicant.assign(Some(value))?;
            print_value(&replicant.value().unwrap_or(Value::Null), cli.json);
            Ok(())
        }
        Commands::Ping => {
            let client = connect(&socket)?;
            let info = client.ping().map_err(Error::from)?;
            if cli.json {
                println!("{}", serde_json::to_string(&info).unwrap_or_default());
            } else {
                println!(
                    "statecast {} (protocol {}, pid {})",
                    info.version, info.protocol_version, info.pid
                );
            }
            Ok(())
        }
    }
}

fn connect(socket: &Path) -> Result<ClientSocket> {
    ClientSocket::connect(socket).map_err(Error::from)
}

fn print_value(value: &Value, compact: bool) {
    let rendered = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    };
    println!("{}", rendered.unwrap_or_else(|_| "null".into()));
}
