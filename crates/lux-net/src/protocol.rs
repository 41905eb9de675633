//! Wire protocol between the streaming client and the authority.
//!
//! Every message is a bincode payload behind a little-endian `u32` length
//! prefix. Transports move whole payloads; [`FrameReader`] reassembles them
//! from a byte stream.

use lux_core::{CellCoord, Element};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{NetError, Result};

/// Largest payload accepted in either direction.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Protocol version for compatibility checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ProtocolVersion {
    /// Version spoken by this build.
    pub const CURRENT: Self = Self::new(0, 1, 0);

    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Returns true if peers speaking `self` and `other` can talk.
    ///
    /// Majors must match; while the major is 0 every minor is breaking.
    pub const fn is_compatible(self, other: Self) -> bool {
        self.major == other.major && (self.major != 0 || self.minor == other.minor)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Message from client to authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Handshake: version and identity.
    Init {
        version: ProtocolVersion,
        name: String,
    },
    /// Request full loads for a batch of cells.
    MapRequest { cells: Vec<CellCoord> },
    /// Client disconnecting.
    Goodbye,
}

/// Message from authority to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Handshake acknowledgement.
    Init {
        version: ProtocolVersion,
        name: String,
        /// Server ticks per second.
        tick_rate: u32,
    },
    /// Sent once per server tick.
    Tick {
        /// Observer position in world units, when the authority drives it.
        observer: Option<[f32; 3]>,
    },
    /// Full element list of a cell.
    CellLoad {
        coord: CellCoord,
        elements: Vec<Element>,
    },
    /// Incremental update of a loaded cell.
    CellUpdate {
        coord: CellCoord,
        /// Positions in the cell's current element list, not `local_index`
        /// values: one sub-cell unit may own several faces.
        removed_positions: Vec<u32>,
        added: Vec<Element>,
    },
    /// The authority cannot provide the cell right now.
    CellUnavailable { coord: CellCoord },
    /// Server shutting down, or acknowledging a client goodbye.
    Goodbye,
}

impl ServerMessage {
    /// Short message name for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Tick { .. } => "tick",
            Self::CellLoad { .. } => "cell_load",
            Self::CellUpdate { .. } => "cell_update",
            Self::CellUnavailable { .. } => "cell_unavailable",
            Self::Goodbye => "goodbye",
        }
    }
}

impl ClientMessage {
    /// Short message name for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::MapRequest { .. } => "map_request",
            Self::Goodbye => "goodbye",
        }
    }
}

/// Serialize a message into a payload (without length prefix).
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let data = bincode::serialize(msg)?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge {
            len: data.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(data)
}

/// Decode a message from a payload (without length prefix).
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(data)?)
}

/// Prepend the length prefix to a payload.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let len = payload.len() as u32;
    let mut result = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    result.extend_from_slice(&len.to_le_bytes());
    result.extend_from_slice(payload);
    Ok(result)
}

/// Reassembles length-prefixed payloads from a byte stream.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete payload, if one is buffered.
    ///
    /// An oversized length prefix is an error; the stream cannot be resynced
    /// after it.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(header) = self.buf.first_chunk::<FRAME_HEADER_SIZE>() else {
            return Ok(None);
        };
        let len = u32::from_le_bytes(*header) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(NetError::FrameTooLarge {
                len,
                max: MAX_FRAME_SIZE,
            });
        }
        if self.buf.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }
        let payload = self.buf[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len].to_vec();
        self.buf.drain(..FRAME_HEADER_SIZE + len);
        Ok(Some(payload))
    }

    /// Drop buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lux_core::{Axis, MaterialId, Orientation};

    #[test]
    fn cell_load_survives_the_wire() {
        let msg = ServerMessage::CellLoad {
            coord: CellCoord::new(-3, 7, 0),
            elements: vec![Element::new(
                17,
                Orientation::new(Axis::Y, false),
                MaterialId::GRASS,
            )],
        };
        let payload = encode(&msg).unwrap();
        let decoded: ServerMessage = decode(&payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let payload = encode(&ClientMessage::MapRequest {
            cells: vec![CellCoord::ZERO, CellCoord::new(1, 2, 3)],
        })
        .unwrap();
        assert!(decode::<ClientMessage>(&payload[..payload.len() - 1]).is_err());
    }

    #[test]
    fn reader_reassembles_split_frames() {
        let a = encode(&ClientMessage::Goodbye).unwrap();
        let b = encode(&ClientMessage::MapRequest {
            cells: vec![CellCoord::new(4, 4, 4)],
        })
        .unwrap();
        let mut stream = frame(&a).unwrap();
        stream.extend(frame(&b).unwrap());

        let mut reader = FrameReader::new();
        reader.extend(&stream[..3]);
        assert_eq!(reader.next_frame().unwrap(), None);
        reader.extend(&stream[3..stream.len() - 1]);
        assert_eq!(reader.next_frame().unwrap(), Some(a));
        assert_eq!(reader.next_frame().unwrap(), None);
        reader.extend(&stream[stream.len() - 1..]);
        assert_eq!(reader.next_frame().unwrap(), Some(b));
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn reader_rejects_oversized_prefix() {
        let mut reader = FrameReader::new();
        reader.extend(&u32::MAX.to_le_bytes());
        assert!(matches!(
            reader.next_frame(),
            Err(NetError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn version_compatibility() {
        let current = ProtocolVersion::CURRENT;
        assert!(current.is_compatible(ProtocolVersion::new(0, 1, 7)));
        assert!(!current.is_compatible(ProtocolVersion::new(0, 2, 0)));
        assert!(!current.is_compatible(ProtocolVersion::new(1, 1, 0)));
        assert!(ProtocolVersion::new(2, 0, 0).is_compatible(ProtocolVersion::new(2, 5, 1)));
        assert_eq!(current.to_string(), "0.1.0");
    }
}
