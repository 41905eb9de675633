//! Transport contract: ordered delivery of whole payloads plus connection events.

mod memory;
mod tcp;

use std::time::Duration;

use crate::error::Result;

pub use memory::{memory_pair, MemoryTransport};
pub use tcp::TcpTransport;

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established.
    Connected,
    /// One complete payload, not yet decoded.
    Frame(Vec<u8>),
    /// The peer went away; no further events follow.
    Disconnected,
}

/// Message-oriented connection to a peer.
pub trait Transport {
    /// Queue one payload for delivery.
    fn send_frame(&mut self, payload: &[u8]) -> Result<()>;

    /// Return the next event if one is available, without blocking.
    fn poll(&mut self) -> Result<Option<TransportEvent>>;

    /// Block for at most `timeout` waiting for the next event.
    fn wait(&mut self, timeout: Duration) -> Result<Option<TransportEvent>>;

    /// Tear the connection down locally.
    fn reset(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        (**self).send_frame(payload)
    }

    fn poll(&mut self) -> Result<Option<TransportEvent>> {
        (**self).poll()
    }

    fn wait(&mut self, timeout: Duration) -> Result<Option<TransportEvent>> {
        (**self).wait(timeout)
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}
