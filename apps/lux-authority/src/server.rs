//! TCP authority: accepts clients, answers map requests with generated cells.

use std::collections::VecDeque;
use std::net::{SocketAddr, TcpListener};

use glam::Vec3;
use hashbrown::HashMap;
use lux_core::{CellCoord, Element};
use lux_net::protocol::{decode, encode};
use lux_net::{
    ClientMessage, NetError, ProtocolVersion, ServerMessage, TcpTransport, Transport,
    TransportEvent,
};
use lux_world::{TerrainGenerator, Window};
use tracing::{debug, info, warn};

/// Cells generated per client per tick.
const MAX_LOADS_PER_TICK: usize = 32;

/// Ticks between scripted cell updates.
const UPDATE_INTERVAL: u64 = 40;

/// Element lists sent to one client, kept so scripted updates stay valid.
///
/// Only cells within [`Window::MAX_RADIUS`] of the observer are remembered;
/// no client window reaches past that.
#[derive(Debug, Default)]
struct ServedCells {
    cells: HashMap<CellCoord, Vec<Element>>,
}

impl ServedCells {
    fn insert(&mut self, coord: CellCoord, elements: Vec<Element>) {
        self.cells.insert(coord, elements);
    }

    fn len(&self) -> usize {
        self.cells.len()
    }

    /// Forget cells farther than `radius` from `center`. Returns how many went.
    fn retain_near(&mut self, center: CellCoord, radius: u32) -> usize {
        let before = self.cells.len();
        self.cells
            .retain(|coord, _| coord.chebyshev_distance(center) <= radius);
        before - self.cells.len()
    }

    /// Move the first element of the non-empty cell nearest `center` to the
    /// end of its list, returning the matching update.
    fn next_update(&mut self, center: CellCoord) -> Option<ServerMessage> {
        let (&coord, elements) = self
            .cells
            .iter_mut()
            .filter(|(_, elements)| !elements.is_empty())
            .min_by_key(|(coord, _)| (coord.distance_squared(center), **coord))?;
        let moved = elements.remove(0);
        elements.push(moved);
        Some(ServerMessage::CellUpdate {
            coord,
            removed_positions: vec![0],
            added: vec![moved],
        })
    }
}

/// One connected client.
struct Client {
    transport: TcpTransport,
    addr: SocketAddr,
    name: Option<String>,
    queue: VecDeque<CellCoord>,
    served: ServedCells,
    closed: bool,
}

impl Client {
    fn send(&mut self, msg: &ServerMessage) {
        let result = encode(msg).and_then(|payload| self.transport.send_frame(&payload));
        if let Err(e) = result {
            warn!(addr = %self.addr, kind = msg.kind(), error = %e, "send failed, dropping client");
            self.closed = true;
        }
    }
}

/// Authority serving every connected client from one generator.
pub struct AuthorityServer {
    listener: TcpListener,
    generator: TerrainGenerator,
    name: String,
    tick_rate: u32,
    clients: Vec<Client>,
    tick: u64,
}

impl AuthorityServer {
    /// Bind the listener on the given port.
    pub fn bind(
        port: u16,
        generator: TerrainGenerator,
        name: String,
        tick_rate: u32,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        info!(port, %name, tick_rate, "authority listening");
        Ok(Self {
            listener,
            generator,
            name,
            tick_rate,
            clients: Vec::new(),
            tick: 0,
        })
    }

    /// Run one server tick with the observer at `observer`.
    pub fn tick(&mut self, observer: [f32; 3]) {
        self.tick += 1;
        let observer_cell = CellCoord::from_world(Vec3::from(observer));
        self.accept();
        for client in &mut self.clients {
            Self::process_messages(client, &self.name, self.tick_rate);
        }
        for client in &mut self.clients {
            if client.closed || client.name.is_none() {
                continue;
            }
            Self::serve(client, &self.generator);
            let forgotten = client.served.retain_near(observer_cell, Window::MAX_RADIUS);
            if forgotten > 0 {
                debug!(addr = %client.addr, forgotten, kept = client.served.len(), "pruned served cells");
            }
            if self.tick % UPDATE_INTERVAL == 0 {
                if let Some(update) = client.served.next_update(observer_cell) {
                    client.send(&update);
                }
            }
            client.send(&ServerMessage::Tick {
                observer: Some(observer),
            });
        }
        self.clients.retain(|client| {
            if client.closed {
                info!(addr = %client.addr, name = ?client.name, "client removed");
            }
            !client.closed
        });
    }

    /// Terrain served to clients.
    pub const fn generator(&self) -> &TerrainGenerator {
        &self.generator
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Say goodbye to every client.
    pub fn shutdown(mut self) {
        for client in &mut self.clients {
            client.send(&ServerMessage::Goodbye);
        }
        info!("authority stopped");
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => match TcpTransport::from_stream(stream) {
                    Ok(transport) => {
                        info!(%addr, "client connected");
                        self.clients.push(Client {
                            transport,
                            addr,
                            name: None,
                            queue: VecDeque::new(),
                            served: ServedCells::default(),
                            closed: false,
                        });
                    }
                    Err(e) => warn!(%addr, error = %e, "failed to set up client stream"),
                },
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!(error = %e, "accept error");
                    return;
                }
            }
        }
    }

    fn process_messages(client: &mut Client, name: &str, tick_rate: u32) {
        while !client.closed {
            let payload = match client.transport.poll() {
                Ok(Some(TransportEvent::Frame(payload))) => payload,
                Ok(Some(TransportEvent::Connected)) => continue,
                Ok(Some(TransportEvent::Disconnected)) => {
                    client.closed = true;
                    return;
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(addr = %client.addr, error = %e, "transport error");
                    client.closed = true;
                    return;
                }
            };
            match decode::<ClientMessage>(&payload) {
                Ok(ClientMessage::Init { version, name: client_name }) => {
                    if !ProtocolVersion::CURRENT.is_compatible(version) {
                        warn!(addr = %client.addr, %version, "incompatible client");
                        client.send(&ServerMessage::Goodbye);
                        client.closed = true;
                        return;
                    }
                    info!(addr = %client.addr, name = %client_name, %version, "client init");
                    client.name = Some(client_name);
                    client.send(&ServerMessage::Init {
                        version: ProtocolVersion::CURRENT,
                        name: name.to_string(),
                        tick_rate,
                    });
                }
                Ok(ClientMessage::MapRequest { cells }) => {
                    debug!(addr = %client.addr, count = cells.len(), "map request");
                    client.queue.extend(cells);
                }
                Ok(ClientMessage::Goodbye) => {
                    info!(addr = %client.addr, "client said goodbye");
                    client.send(&ServerMessage::Goodbye);
                    client.closed = true;
                }
                Err(NetError::Codec(e)) => {
                    warn!(addr = %client.addr, error = %e, "dropping malformed message");
                }
                Err(e) => {
                    warn!(addr = %client.addr, error = %e, "dropping message");
                }
            }
        }
    }

    fn serve(client: &mut Client, generator: &TerrainGenerator) {
        let count = client.queue.len().min(MAX_LOADS_PER_TICK);
        if count == 0 {
            return;
        }
        let batch: Vec<CellCoord> = client.queue.drain(..count).collect();
        for (coord, elements) in generator.generate_cells_parallel(&batch) {
            client.send(&ServerMessage::CellLoad {
                coord,
                elements: elements.clone(),
            });
            client.served.insert(coord, elements);
        }
    }
}
