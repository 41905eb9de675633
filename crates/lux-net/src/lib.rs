//! Network layer for the Lux streaming client.
//!
//! - [`protocol`]: length-prefixed bincode messages and version negotiation
//! - [`transport`]: the transport contract with TCP and in-memory implementations
//! - [`session`]: handshake, per-tick message pump and disconnect

pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::{HandshakeStage, NetError, Result};
pub use protocol::{ClientMessage, ProtocolVersion, ServerMessage, MAX_FRAME_SIZE};
pub use session::{DisconnectOutcome, Session, SessionConfig, SessionState, TickReport};
pub use transport::{memory_pair, MemoryTransport, TcpTransport, Transport, TransportEvent};

/// Default authority port.
pub const DEFAULT_PORT: u16 = 4280;
