use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, time::Duration};

use crate::cli::ServeArgs;

pub const DEFAULT_MAILBOX_CAPACITY: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

pub const DEFAULT_COMMAND_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 10;

/// Per-connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Envelopes a connection may have queued before the hub evicts it.
    pub mailbox_capacity: NonZeroUsize,
    /// Deadline for a single transport write.
    pub write_timeout: Duration,
    /// Deadline for each transport read; `None` waits indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECS),
            idle_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub listen: SocketAddr,
    pub command_capacity: NonZeroUsize,
    pub static_dir: Option<PathBuf>,
    pub connection: ConnectionSettings,
}

impl From<ServeArgs> for HubSettings {
    fn from(args: ServeArgs) -> Self {
        Self {
            listen: args.listen,
            command_capacity: args.command_capacity,
            static_dir: args.static_dir,
            connection: ConnectionSettings {
                mailbox_capacity: args.mailbox_capacity,
                write_timeout: Duration::from_secs(args.write_timeout_secs),
                idle_timeout: args.idle_timeout_secs.map(Duration::from_secs),
            },
        }
    }
}
