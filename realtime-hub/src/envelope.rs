use std::{fmt, io, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content of the notice sent to existing members when a connection joins.
pub const JOINED_NOTICE: &str = "/A new socket has connected";
/// Content of the notice sent to remaining members when a connection leaves.
pub const LEFT_NOTICE: &str = "/A socket has disconnected";
/// Content of the notice sent to every member before the hub stops.
pub const SHUTDOWN_NOTICE: &str = "/The server is shutting down";

/// Process-unique identity of one connection. Random, never derived from
/// any credential, and only ever used as the `sender` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One message unit flowing through the hub.
///
/// System notices carry no sender. `recipient` is part of the wire shape but
/// never consulted for routing: every envelope is delivered to all members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sender: Option<ConnectionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipient: Option<ConnectionId>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    content: String,
}

impl Envelope {
    /// Wraps a payload read from `sender`'s transport.
    pub fn message(sender: ConnectionId, content: impl Into<String>) -> Self {
        Self {
            sender: Some(sender),
            recipient: None,
            content: content.into(),
        }
    }

    pub fn joined() -> Self {
        Self::notice(JOINED_NOTICE)
    }

    pub fn left() -> Self {
        Self::notice(LEFT_NOTICE)
    }

    pub fn shutdown() -> Self {
        Self::notice(SHUTDOWN_NOTICE)
    }

    fn notice(content: &str) -> Self {
        Self {
            sender: None,
            recipient: None,
            content: content.to_string(),
        }
    }

    pub fn sender(&self) -> Option<ConnectionId> {
        self.sender
    }

    pub fn recipient(&self) -> Option<ConnectionId> {
        self.recipient
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Whether this envelope was produced by the hub rather than a client.
    pub fn is_notice(&self) -> bool {
        self.sender.is_none()
    }

    pub fn to_json(&self) -> io::Result<String> {
        serde_json::to_string(self).map_err(to_io_error)
    }

    pub fn from_json(text: &str) -> io::Result<Self> {
        serde_json::from_str(text).map_err(to_io_error)
    }
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
