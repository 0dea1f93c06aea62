use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_COMMAND_CAPACITY, DEFAULT_MAILBOX_CAPACITY, DEFAULT_WRITE_TIMEOUT_SECS};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the hub, accepting WebSocket connections on /api/ws.
    Serve(ServeArgs),
    /// Connect to a hub and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the server should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Envelopes a connection may have queued before it is evicted.
    #[arg(long, default_value_t = DEFAULT_MAILBOX_CAPACITY)]
    pub mailbox_capacity: NonZeroUsize,

    /// Commands the hub queues before submitters wait.
    #[arg(long, default_value_t = DEFAULT_COMMAND_CAPACITY)]
    pub command_capacity: NonZeroUsize,

    /// Seconds a single write to a client may take before the client is dropped.
    #[arg(long, default_value_t = DEFAULT_WRITE_TIMEOUT_SECS)]
    pub write_timeout_secs: u64,

    /// Seconds without any inbound frame before a client is dropped.
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Directory of static files served at `/`.
    #[arg(long)]
    pub static_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the hub to connect to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub server: SocketAddr,
}
