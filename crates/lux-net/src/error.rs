//! Error types for the network layer.

use thiserror::Error;

use crate::protocol::ProtocolVersion;

/// Handshake step that ran out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStage {
    /// Waiting for the transport to report the connection.
    Connect,
    /// Waiting for the authority's init message.
    ServerInit,
}

impl std::fmt::Display for HandshakeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connection"),
            Self::ServerInit => write!(f, "server init"),
        }
    }
}

/// Network layer errors.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("server did not answer the handshake ({stage}) after {attempts} attempts")]
    HandshakeTimeout {
        stage: HandshakeStage,
        attempts: u32,
    },

    #[error("protocol version mismatch: server {server}, client {client}")]
    VersionMismatch {
        server: ProtocolVersion,
        client: ProtocolVersion,
    },

    #[error("peer is not reading: {buffered} bytes queued (max {max})")]
    SendBufferFull { buffered: usize, max: usize },

    #[error("transport disconnected")]
    Disconnected,

    #[error("invalid session state: {0}")]
    InvalidState(&'static str),
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;
