//! In-process transport over a pair of channels.

use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::{Transport, TransportEvent};
use crate::error::{NetError, Result};

/// One end of an in-process connection.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Sender<TransportEvent>,
    rx: Receiver<TransportEvent>,
    closed: bool,
}

/// Create two connected ends. Both see [`TransportEvent::Connected`] first.
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = unbounded();
    let (b_tx, a_rx) = unbounded();
    let _ = a_tx.send(TransportEvent::Connected);
    let _ = b_tx.send(TransportEvent::Connected);
    (
        MemoryTransport {
            tx: a_tx,
            rx: a_rx,
            closed: false,
        },
        MemoryTransport {
            tx: b_tx,
            rx: b_rx,
            closed: false,
        },
    )
}

impl MemoryTransport {
    /// Returns true once either end has gone away.
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn received(&mut self, event: TransportEvent) -> TransportEvent {
        if event == TransportEvent::Disconnected {
            self.closed = true;
        }
        event
    }
}

impl Transport for MemoryTransport {
    fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        if self.closed {
            return Err(NetError::Disconnected);
        }
        self.tx
            .send(TransportEvent::Frame(payload.to_vec()))
            .map_err(|_| NetError::Disconnected)
    }

    fn poll(&mut self) -> Result<Option<TransportEvent>> {
        if self.closed {
            return Ok(None);
        }
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(self.received(event))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Ok(Some(self.received(TransportEvent::Disconnected)))
            }
        }
    }

    fn wait(&mut self, timeout: Duration) -> Result<Option<TransportEvent>> {
        if self.closed {
            return Ok(None);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(self.received(event))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Ok(Some(self.received(TransportEvent::Disconnected)))
            }
        }
    }

    fn reset(&mut self) {
        if !self.closed {
            let _ = self.tx.send(TransportEvent::Disconnected);
            self.closed = true;
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.reset();
    }
}
