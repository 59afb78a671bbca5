//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, IpcError>;

/// Error enumeration covering every transport, protocol and client failure mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Bind, listen or accept failure while starting the server.
    Transport(String),
    /// The socket path does not exist (yet).
    PathNotFound(String),
    /// The socket path is malformed or cannot be addressed.
    InvalidPath(String),
    /// The server exists but cannot take the connection right now.
    Busy(String),
    /// A socket file exists but nothing is accepting connections on it.
    NotListening(String),
    /// Malformed framing or an unreadable command.
    Protocol(String),
    /// The application callback failed the request.
    Application(String),
    /// The server closed the connection before finishing the reply.
    IncompleteReply(String),
    /// The peer closed the connection while a reply was being written.
    PeerGone(String),
    /// File-system or socket I/O failure.
    Io(String),
}

impl IpcError {
    /// Whether the client connect policy may retry after this failure.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PathNotFound(_) | Self::Busy(_) | Self::NotListening(_))
    }
}

impl Display for IpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::PathNotFound(msg) => write!(f, "path not found: {msg}"),
            Self::InvalidPath(msg) => write!(f, "invalid path: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
            Self::NotListening(msg) => write!(f, "not listening: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Application(msg) => write!(f, "application: {msg}"),
            Self::IncompleteReply(msg) => write!(f, "incomplete reply: {msg}"),
            Self::PeerGone(msg) => write!(f, "peer gone: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for IpcError {}

impl From<toml::de::Error> for IpcError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
