//! TCP transport: length-prefixed frames over a non-blocking stream.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::{Transport, TransportEvent};
use crate::error::{NetError, Result};
use crate::protocol::{frame, FrameReader, MAX_FRAME_SIZE};

/// Bytes read from the socket per syscall.
const READ_CHUNK: usize = 64 * 1024;

/// Default cap on bytes queued for a peer that is not reading.
const DEFAULT_SEND_LIMIT: usize = 2 * MAX_FRAME_SIZE;

/// Sleep between polls while waiting.
const WAIT_STEP: Duration = Duration::from_millis(1);

/// Transport over a TCP stream.
///
/// Writes never block: whatever the socket does not accept is queued and
/// flushed on later sends and polls. A peer that lets the queue grow past the
/// send limit is disconnected.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    reader: FrameReader,
    /// Framed bytes the socket has not accepted yet.
    outbox: Vec<u8>,
    send_limit: usize,
    /// `Connected` not yet reported.
    announce: bool,
    scratch: Box<[u8]>,
}

impl TcpTransport {
    /// Connect to `addr`, giving up after `timeout`.
    pub fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let mut last_error = None;
        for addr in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_stream(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.map_or(NetError::Disconnected, NetError::Io))
    }

    /// Wrap an accepted or already connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        // Lower latency for small request batches
        let _ = stream.set_nodelay(true);
        let peer = stream.peer_addr().ok();
        debug!(?peer, "tcp transport opened");
        Ok(Self {
            stream: Some(stream),
            peer,
            reader: FrameReader::new(),
            outbox: Vec::new(),
            send_limit: DEFAULT_SEND_LIMIT,
            announce: true,
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
        })
    }

    /// Set the cap on queued outbound bytes.
    #[must_use]
    pub fn with_send_limit(mut self, limit: usize) -> Self {
        self.send_limit = limit;
        self
    }

    /// Bytes queued but not yet accepted by the socket.
    pub fn pending_bytes(&self) -> usize {
        self.outbox.len()
    }

    /// Address of the remote end.
    pub const fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Returns true while the stream is open.
    pub const fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(peer = ?self.peer, "tcp transport closed");
        }
        self.reader.clear();
        self.outbox.clear();
    }

    /// Write as much of the outbox as the socket accepts without blocking.
    fn flush(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(NetError::Disconnected);
        };
        let mut written = 0;
        let result = loop {
            if written == self.outbox.len() {
                break Ok(());
            }
            match stream.write(&self.outbox[written..]) {
                Ok(0) => break Err(NetError::Disconnected),
                Ok(n) => written += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::BrokenPipe
                    ) =>
                {
                    break Err(NetError::Disconnected);
                }
                Err(e) => break Err(e.into()),
            }
        };
        self.outbox.drain(..written);
        if result.is_err() {
            self.close();
        }
        result
    }
}

impl Transport for TcpTransport {
    fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        let data = frame(payload)?;
        self.flush()?;
        let buffered = self.outbox.len() + data.len();
        if buffered > self.send_limit {
            warn!(peer = ?self.peer, buffered, max = self.send_limit, "peer is not reading, closing");
            self.close();
            return Err(NetError::SendBufferFull {
                buffered,
                max: self.send_limit,
            });
        }
        self.outbox.extend_from_slice(&data);
        self.flush()?;
        trace!(bytes = data.len(), queued = self.outbox.len(), "sent frame");
        Ok(())
    }

    fn poll(&mut self) -> Result<Option<TransportEvent>> {
        if self.announce {
            self.announce = false;
            return Ok(Some(TransportEvent::Connected));
        }
        if !self.outbox.is_empty() {
            match self.flush() {
                Ok(()) => {}
                Err(NetError::Disconnected) => return Ok(Some(TransportEvent::Disconnected)),
                Err(e) => return Err(e),
            }
        }
        loop {
            if let Some(payload) = self.reader.next_frame()? {
                return Ok(Some(TransportEvent::Frame(payload)));
            }
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            match stream.read(&mut self.scratch) {
                Ok(0) => {
                    self.close();
                    return Ok(Some(TransportEvent::Disconnected));
                }
                Ok(n) => self.reader.extend(&self.scratch[..n]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                    ) =>
                {
                    self.close();
                    return Ok(Some(TransportEvent::Disconnected));
                }
                Err(e) => {
                    self.close();
                    return Err(e.into());
                }
            }
        }
    }

    fn wait(&mut self, timeout: Duration) -> Result<Option<TransportEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.poll()? {
                return Ok(Some(event));
            }
            if self.stream.is_none() || Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(WAIT_STEP);
        }
    }

    fn reset(&mut self) {
        if !self.outbox.is_empty() {
            let _ = self.flush();
        }
        self.close();
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
