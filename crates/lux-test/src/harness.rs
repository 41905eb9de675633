//! Scripted authority and recording sink for session-level tests.
//!
//! Everything runs on the test thread: the authority greets before the client
//! connects, so [`Session::connect`] finds the init message already queued,
//! and the test interleaves [`TestAuthority::pump`] / [`TestAuthority::serve`]
//! with [`Session::tick`] to control exactly what each tick sees.

use std::time::{Duration, Instant};

use glam::Vec3;
use hashbrown::{HashMap, HashSet};
use lux_core::{CellCoord, Element};
use lux_net::protocol::{decode, encode};
use lux_net::{
    memory_pair, ClientMessage, MemoryTransport, ProtocolVersion, ServerMessage, Session,
    Transport, TransportEvent,
};
use lux_world::{CellEvictionSink, CellSlot, TerrainGenerator};
use tracing::debug;

use crate::{HarnessConfig, Result, TestError};

/// Authority end of an in-memory connection.
pub struct TestAuthority {
    transport: MemoryTransport,
    generator: TerrainGenerator,
    name: String,
    tick_rate: u32,
    client: Option<(ProtocolVersion, String)>,
    /// Every cell the client asked for, in arrival order.
    requested: Vec<CellCoord>,
    /// Requests not yet answered.
    queue: Vec<CellCoord>,
    unavailable: HashSet<CellCoord>,
    /// Element lists the client should hold, per cell sent.
    sent: HashMap<CellCoord, Vec<Element>>,
    client_gone: bool,
}

impl TestAuthority {
    /// Take the authority end and send the init greeting.
    pub fn new(transport: MemoryTransport, generator: TerrainGenerator) -> Result<Self> {
        let mut authority = Self {
            transport,
            generator,
            name: String::from("test-authority"),
            tick_rate: 20,
            client: None,
            requested: Vec::new(),
            queue: Vec::new(),
            unavailable: HashSet::new(),
            sent: HashMap::new(),
            client_gone: false,
        };
        authority.send(&ServerMessage::Init {
            version: ProtocolVersion::CURRENT,
            name: authority.name.clone(),
            tick_rate: authority.tick_rate,
        })?;
        Ok(authority)
    }

    /// Terrain the authority serves.
    pub const fn generator(&self) -> &TerrainGenerator {
        &self.generator
    }

    /// Name and version the client announced.
    pub fn client(&self) -> Option<(ProtocolVersion, &str)> {
        self.client
            .as_ref()
            .map(|(version, name)| (*version, name.as_str()))
    }

    /// Every cell requested so far, in arrival order.
    pub fn requested(&self) -> &[CellCoord] {
        &self.requested
    }

    /// Requests received but not yet answered.
    pub fn queued(&self) -> &[CellCoord] {
        &self.queue
    }

    /// Elements the client should hold for `coord` after everything sent so far.
    pub fn expected(&self, coord: CellCoord) -> Option<&[Element]> {
        self.sent.get(&coord).map(Vec::as_slice)
    }

    /// Returns true once the client said goodbye or dropped the connection.
    pub const fn client_gone(&self) -> bool {
        self.client_gone
    }

    /// Answer future requests for `coord` with `CellUnavailable`.
    pub fn mark_unavailable(&mut self, coord: CellCoord) {
        self.unavailable.insert(coord);
    }

    /// Answer future requests for `coord` normally again.
    pub fn mark_available(&mut self, coord: CellCoord) {
        self.unavailable.remove(&coord);
    }

    /// Read every buffered client message. Returns the number read.
    pub fn pump(&mut self) -> Result<usize> {
        let mut count = 0;
        while let Some(event) = self.transport.poll()? {
            count += usize::from(self.handle(event)?);
        }
        Ok(count)
    }

    fn handle(&mut self, event: TransportEvent) -> Result<bool> {
        let payload = match event {
            TransportEvent::Frame(payload) => payload,
            TransportEvent::Disconnected => {
                self.client_gone = true;
                return Ok(false);
            }
            TransportEvent::Connected => return Ok(false),
        };
        match decode::<ClientMessage>(&payload)? {
            ClientMessage::Init { version, name } => {
                if self.client.is_some() {
                    return Err(TestError::Protocol(String::from("second client init")));
                }
                debug!(%version, %name, "client init");
                self.client = Some((version, name));
            }
            ClientMessage::MapRequest { cells } => {
                if self.client.is_none() {
                    return Err(TestError::Protocol(String::from("map request before init")));
                }
                self.requested.extend_from_slice(&cells);
                self.queue.extend(cells);
            }
            ClientMessage::Goodbye => {
                self.client_gone = true;
                self.send(&ServerMessage::Goodbye)?;
            }
        }
        Ok(true)
    }

    /// Answer up to `max` queued requests, oldest first. Returns the number answered.
    pub fn serve(&mut self, max: usize) -> Result<usize> {
        let count = max.min(self.queue.len());
        let batch: Vec<CellCoord> = self.queue.drain(..count).collect();
        for coord in batch {
            if self.unavailable.contains(&coord) {
                self.send(&ServerMessage::CellUnavailable { coord })?;
            } else {
                let elements = self.generator.generate_cell(coord);
                self.send_load(coord, elements)?;
            }
        }
        Ok(count)
    }

    /// Send a full load with explicit content.
    pub fn send_load(&mut self, coord: CellCoord, elements: Vec<Element>) -> Result<()> {
        self.send(&ServerMessage::CellLoad {
            coord,
            elements: elements.clone(),
        })?;
        self.sent.insert(coord, elements);
        Ok(())
    }

    /// Send an incremental update and track the resulting element list.
    ///
    /// The tracked list applies removals highest position first, then appends.
    pub fn send_delta(
        &mut self,
        coord: CellCoord,
        removed_positions: Vec<u32>,
        added: Vec<Element>,
    ) -> Result<()> {
        if let Some(elements) = self.sent.get_mut(&coord) {
            let mut order = removed_positions.clone();
            order.sort_unstable_by(|a, b| b.cmp(a));
            for position in order {
                if (position as usize) < elements.len() {
                    elements.remove(position as usize);
                }
            }
            elements.extend_from_slice(&added);
        }
        self.send(&ServerMessage::CellUpdate {
            coord,
            removed_positions,
            added,
        })
    }

    /// Send a server tick.
    pub fn send_tick(&mut self, observer: Option<Vec3>) -> Result<()> {
        self.send(&ServerMessage::Tick {
            observer: observer.map(|position| position.to_array()),
        })
    }

    /// Send a goodbye.
    pub fn say_goodbye(&mut self) -> Result<()> {
        self.send(&ServerMessage::Goodbye)
    }

    /// Send an arbitrary payload, bypassing the encoder.
    pub fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        Ok(self.transport.send_frame(payload)?)
    }

    /// Keep handling messages and answering requests until the client is gone.
    pub fn serve_until_closed(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !self.client_gone {
            if Instant::now() >= deadline {
                return Err(TestError::Timeout(String::from("client never disconnected")));
            }
            if let Some(event) = self.transport.wait(Duration::from_millis(5))? {
                self.handle(event)?;
            }
            self.serve(usize::MAX)?;
        }
        Ok(())
    }

    fn send(&mut self, msg: &ServerMessage) -> Result<()> {
        let payload = encode(msg)?;
        Ok(self.transport.send_frame(&payload)?)
    }
}

/// Connect a session to a fresh [`TestAuthority`] and consume the client's init.
pub fn connect(config: HarnessConfig) -> Result<(Session<MemoryTransport>, TestAuthority)> {
    let (client, server) = memory_pair();
    let mut authority = TestAuthority::new(server, TerrainGenerator::with_seed(config.seed))?;
    let session = Session::connect(client, config.session, config.cache)?;
    authority.pump()?;
    Ok((session, authority))
}

/// Eviction sink that remembers what it was handed.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub evicted: Vec<CellCoord>,
    /// Elements released across all evicted cells.
    pub elements: usize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CellEvictionSink for RecordingSink {
    fn on_evict(&mut self, coord: CellCoord, slot: &CellSlot) {
        self.evicted.push(coord);
        self.elements += slot.mesh().len();
    }
}
