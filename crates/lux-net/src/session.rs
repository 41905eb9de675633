//! Client session: handshake, per-tick message pump and disconnect.
//!
//! A session owns the transport and the [`CellCache`]. Each [`Session::tick`]
//! drains inbound messages into the cache, moves the window to the observer,
//! and sends the next batch of cell requests. Nothing in a tick blocks; only
//! [`Session::connect`] and [`Session::disconnect`] wait on the peer, each
//! within a fixed retry budget.

use std::time::Duration;

use glam::Vec3;
use lux_core::CellCoord;
use lux_world::{CacheConfig, CellCache, CellEvictionSink, ObserverFeed};
use tracing::{debug, info, warn};

use crate::error::{HandshakeStage, NetError, Result};
use crate::protocol::{decode, encode, ClientMessage, ProtocolVersion, ServerMessage};
use crate::transport::{Transport, TransportEvent};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Handshaking,
    Connected,
    Disconnecting,
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name announced to the authority.
    pub client_name: String,
    /// Waits for each handshake step before giving up.
    pub connect_attempts: u32,
    /// Length of one handshake wait.
    pub connect_try_time: Duration,
    /// Waits for the authority's goodbye before forcing the connection closed.
    pub disconnect_attempts: u32,
    /// Length of one disconnect wait.
    pub disconnect_try_time: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: String::from("lux-client"),
            connect_attempts: 10,
            connect_try_time: Duration::from_millis(50),
            disconnect_attempts: 30,
            disconnect_try_time: Duration::from_millis(25),
        }
    }
}

impl SessionConfig {
    /// Set the announced client name.
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    /// Set the handshake retry budget.
    pub fn with_connect_retries(mut self, attempts: u32, try_time: Duration) -> Self {
        self.connect_attempts = attempts;
        self.connect_try_time = try_time;
        self
    }

    /// Set the disconnect retry budget.
    pub fn with_disconnect_retries(mut self, attempts: u32, try_time: Duration) -> Self {
        self.disconnect_attempts = attempts;
        self.disconnect_try_time = try_time;
        self
    }
}

/// How a disconnect ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// The authority acknowledged, or had already closed the connection.
    Graceful,
    /// No acknowledgement within the retry budget; torn down locally.
    Forced,
}

/// Counters for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Frames received.
    pub messages: usize,
    /// Frames that were malformed or rejected by the cache.
    pub dropped: usize,
    /// Full loads applied.
    pub loaded: usize,
    /// Deltas applied.
    pub updated: usize,
    /// Cells the authority reported unavailable.
    pub unavailable: usize,
    /// Cells evicted by the window move.
    pub evicted: usize,
    /// Cells requested this tick.
    pub requested: usize,
    /// A server tick message arrived.
    pub received_tick: bool,
    /// The connection ended during this tick.
    pub closed: bool,
}

/// Streaming session with an authority.
pub struct Session<T: Transport> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    cache: CellCache,
    server_name: String,
    tick_rate: u32,
    observer_position: Option<Vec3>,
}

impl<T: Transport> Session<T> {
    /// Perform the handshake over `transport`.
    ///
    /// Fails if the transport never reports the connection, the authority
    /// never sends its init message, or the versions are incompatible. The
    /// transport is reset on failure.
    pub fn connect(
        mut transport: T,
        config: SessionConfig,
        cache_config: CacheConfig,
    ) -> Result<Self> {
        info!(name = %config.client_name, "connecting to authority");

        match Self::handshake(&mut transport, &config) {
            Ok((server_name, tick_rate)) => {
                info!(server = %server_name, tick_rate, "session established");
                Ok(Self {
                    transport,
                    config,
                    state: SessionState::Connected,
                    cache: CellCache::new(cache_config, CellCoord::ZERO),
                    server_name,
                    tick_rate,
                    observer_position: None,
                })
            }
            Err(e) => {
                warn!(error = %e, "handshake failed");
                transport.reset();
                Err(e)
            }
        }
    }

    fn handshake(transport: &mut T, config: &SessionConfig) -> Result<(String, u32)> {
        let attempts = config.connect_attempts;

        let mut connected = false;
        for _ in 0..attempts {
            match transport.wait(config.connect_try_time)? {
                Some(TransportEvent::Connected) => {
                    connected = true;
                    break;
                }
                Some(TransportEvent::Frame(_)) => debug!("frame before connect, ignoring"),
                Some(TransportEvent::Disconnected) => return Err(NetError::Disconnected),
                None => {}
            }
        }
        if !connected {
            return Err(NetError::HandshakeTimeout {
                stage: HandshakeStage::Connect,
                attempts,
            });
        }

        let init = encode(&ClientMessage::Init {
            version: ProtocolVersion::CURRENT,
            name: config.client_name.clone(),
        })?;
        transport.send_frame(&init)?;
        debug!("sent init");

        for _ in 0..attempts {
            let payload = match transport.wait(config.connect_try_time)? {
                Some(TransportEvent::Frame(payload)) => payload,
                Some(TransportEvent::Disconnected) => return Err(NetError::Disconnected),
                Some(TransportEvent::Connected) | None => continue,
            };
            match decode::<ServerMessage>(&payload) {
                Ok(ServerMessage::Init {
                    version,
                    name,
                    tick_rate,
                }) => {
                    if !ProtocolVersion::CURRENT.is_compatible(version) {
                        return Err(NetError::VersionMismatch {
                            server: version,
                            client: ProtocolVersion::CURRENT,
                        });
                    }
                    return Ok((name, tick_rate));
                }
                Ok(other) => debug!(kind = other.kind(), "message before init, ignoring"),
                Err(e) => warn!(error = %e, "malformed frame during handshake, ignoring"),
            }
        }
        Err(NetError::HandshakeTimeout {
            stage: HandshakeStage::ServerInit,
            attempts,
        })
    }

    /// Current state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Read view of the cache, for the renderer between ticks.
    pub const fn cache(&self) -> &CellCache {
        &self.cache
    }

    /// Name the authority announced.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Server ticks per second.
    pub const fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Observer position from the latest server tick that carried one.
    pub const fn last_observer_position(&self) -> Option<Vec3> {
        self.observer_position
    }

    /// Session configuration.
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one client tick.
    ///
    /// Drains every buffered message into the cache, follows `observer`
    /// (evicting through `sink`), then sends the next request batch.
    /// Malformed or rejected messages are logged and dropped; only transport
    /// failures are returned as errors.
    pub fn tick<O, S>(&mut self, observer: &O, sink: &mut S) -> Result<TickReport>
    where
        O: ObserverFeed + ?Sized,
        S: CellEvictionSink + ?Sized,
    {
        if self.state != SessionState::Connected {
            return Err(NetError::InvalidState("tick requires a connected session"));
        }
        let tick = self.cache.advance_tick();
        let mut report = TickReport::default();

        while let Some(event) = self.transport.poll()? {
            match event {
                TransportEvent::Frame(payload) => {
                    report.messages += 1;
                    self.dispatch(&payload, &mut report);
                }
                TransportEvent::Disconnected => {
                    info!("authority closed the connection");
                    self.close(&mut report);
                }
                TransportEvent::Connected => {}
            }
            if report.closed {
                return Ok(report);
            }
        }
        if !report.received_tick {
            warn!(tick, "lost server tick");
        }

        report.evicted = self.cache.follow(observer, sink).evicted;

        self.cache.request_missing();
        let cells = self.cache.take_requests();
        if !cells.is_empty() {
            let sent = encode(&ClientMessage::MapRequest {
                cells: cells.clone(),
            })
            .and_then(|payload| self.transport.send_frame(&payload));
            match sent {
                Ok(()) => report.requested = cells.len(),
                Err(NetError::Disconnected) => {
                    self.cache.requeue(&cells);
                    info!("authority closed the connection");
                    self.close(&mut report);
                }
                Err(e) => {
                    self.cache.requeue(&cells);
                    warn!(error = %e, count = cells.len(), "map request not sent");
                    return Err(e);
                }
            }
        }

        debug!(
            tick,
            messages = report.messages,
            dropped = report.dropped,
            loaded = report.loaded,
            updated = report.updated,
            evicted = report.evicted,
            requested = report.requested,
            pending = self.cache.pending_count(),
            "tick"
        );
        Ok(report)
    }

    fn dispatch(&mut self, payload: &[u8], report: &mut TickReport) {
        let msg = match decode::<ServerMessage>(payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "dropping malformed message");
                report.dropped += 1;
                return;
            }
        };
        match msg {
            ServerMessage::Tick { observer } => {
                report.received_tick = true;
                if let Some(position) = observer {
                    self.observer_position = Some(Vec3::from(position));
                }
            }
            ServerMessage::CellLoad { coord, elements } => {
                match self.cache.on_full_load(coord, elements) {
                    Ok(()) => report.loaded += 1,
                    Err(e) => {
                        warn!(%coord, error = %e, "dropping cell load");
                        report.dropped += 1;
                    }
                }
            }
            ServerMessage::CellUpdate {
                coord,
                removed_positions,
                added,
            } => match self.cache.on_delta(coord, &removed_positions, &added) {
                Ok(()) => report.updated += 1,
                Err(e) => {
                    warn!(%coord, error = %e, "dropping cell update");
                    report.dropped += 1;
                }
            },
            ServerMessage::CellUnavailable { coord } => {
                debug!(%coord, "cell unavailable");
                self.cache.on_unavailable(coord);
                report.unavailable += 1;
            }
            ServerMessage::Goodbye => {
                info!("authority said goodbye");
                self.close(report);
            }
            ServerMessage::Init { .. } => {
                warn!("dropping init outside the handshake");
                report.dropped += 1;
            }
        }
    }

    fn close(&mut self, report: &mut TickReport) {
        self.transport.reset();
        self.state = SessionState::Disconnected;
        report.closed = true;
    }

    /// Say goodbye and wait for the authority to acknowledge.
    ///
    /// Best effort: when the authority does not answer within the retry budget
    /// the connection is torn down locally anyway.
    pub fn disconnect(mut self) -> DisconnectOutcome {
        if self.state == SessionState::Disconnected {
            return DisconnectOutcome::Graceful;
        }
        self.state = SessionState::Disconnecting;

        let outcome = self.await_goodbye();
        self.transport.reset();
        self.state = SessionState::Disconnected;
        info!(?outcome, "disconnected");
        outcome
    }

    fn await_goodbye(&mut self) -> DisconnectOutcome {
        let sent = encode(&ClientMessage::Goodbye)
            .and_then(|payload| self.transport.send_frame(&payload));
        match sent {
            Ok(()) => {}
            Err(NetError::Disconnected) => return DisconnectOutcome::Graceful,
            Err(e) => {
                warn!(error = %e, "failed to send goodbye");
                return DisconnectOutcome::Forced;
            }
        }

        for _ in 0..self.config.disconnect_attempts {
            match self.transport.wait(self.config.disconnect_try_time) {
                Ok(Some(TransportEvent::Disconnected)) => return DisconnectOutcome::Graceful,
                Ok(Some(TransportEvent::Frame(payload))) => {
                    if matches!(decode::<ServerMessage>(&payload), Ok(ServerMessage::Goodbye)) {
                        return DisconnectOutcome::Graceful;
                    }
                }
                Ok(Some(TransportEvent::Connected) | None) => {}
                Err(e) => {
                    warn!(error = %e, "transport error while disconnecting");
                    return DisconnectOutcome::Forced;
                }
            }
        }
        warn!(
            attempts = self.config.disconnect_attempts,
            "authority did not acknowledge disconnect"
        );
        DisconnectOutcome::Forced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{memory_pair, MemoryTransport};
    use lux_core::{Axis, Element, MaterialId, Orientation};
    use lux_world::{CellSlot, FixedObserver};
    use std::cell::Cell;
    use std::rc::Rc;

    /// Never reports a connection; records whether it was reset.
    struct SilentTransport {
        reset: Rc<Cell<bool>>,
    }

    impl Transport for SilentTransport {
        fn send_frame(&mut self, _payload: &[u8]) -> Result<()> {
            Ok(())
        }

        fn poll(&mut self) -> Result<Option<TransportEvent>> {
            Ok(None)
        }

        fn wait(&mut self, timeout: Duration) -> Result<Option<TransportEvent>> {
            std::thread::sleep(timeout);
            Ok(None)
        }

        fn reset(&mut self) {
            self.reset.set(true);
        }
    }

    /// Memory transport whose sends fail while `fail_sends` is set.
    struct FlakyTransport {
        inner: MemoryTransport,
        fail_sends: Rc<Cell<bool>>,
    }

    impl Transport for FlakyTransport {
        fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
            if self.fail_sends.get() {
                return Err(NetError::Io(std::io::Error::other("send failed")));
            }
            self.inner.send_frame(payload)
        }

        fn poll(&mut self) -> Result<Option<TransportEvent>> {
            self.inner.poll()
        }

        fn wait(&mut self, timeout: Duration) -> Result<Option<TransportEvent>> {
            self.inner.wait(timeout)
        }

        fn reset(&mut self) {
            self.inner.reset();
        }
    }

    fn fast() -> SessionConfig {
        SessionConfig::default()
            .with_connect_retries(3, Duration::from_millis(1))
            .with_disconnect_retries(3, Duration::from_millis(1))
    }

    fn send(end: &mut MemoryTransport, msg: &ServerMessage) {
        end.send_frame(&encode(msg).unwrap()).unwrap();
    }

    fn greet(end: &mut MemoryTransport) {
        send(
            end,
            &ServerMessage::Init {
                version: ProtocolVersion::CURRENT,
                name: "test-authority".into(),
                tick_rate: 20,
            },
        );
    }

    fn connected(radius: u32) -> (Session<MemoryTransport>, MemoryTransport) {
        let (client, mut server) = memory_pair();
        greet(&mut server);
        let session = Session::connect(
            client,
            fast(),
            CacheConfig::default().with_radius(radius),
        )
        .unwrap();
        (session, server)
    }

    fn client_messages(end: &mut MemoryTransport) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Some(event) = end.poll().unwrap() {
            if let TransportEvent::Frame(payload) = event {
                out.push(decode(&payload).unwrap());
            }
        }
        out
    }

    fn face() -> Element {
        Element::new(0, Orientation::new(Axis::Y, true), MaterialId::GRASS)
    }

    #[test]
    fn handshake_sends_init_and_reads_server_info() {
        let (session, mut server) = connected(1);
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.server_name(), "test-authority");
        assert_eq!(session.tick_rate(), 20);
        assert_eq!(
            client_messages(&mut server),
            vec![ClientMessage::Init {
                version: ProtocolVersion::CURRENT,
                name: "lux-client".into(),
            }]
        );
    }

    #[test]
    fn silent_authority_fails_the_handshake() {
        let (client, _server) = memory_pair();
        let result = Session::connect(client, fast(), CacheConfig::default());
        assert!(matches!(
            result,
            Err(NetError::HandshakeTimeout {
                stage: HandshakeStage::ServerInit,
                attempts: 3
            })
        ));
    }

    #[test]
    fn transport_that_never_connects_fails_the_handshake() {
        let reset = Rc::new(Cell::new(false));
        let transport = SilentTransport {
            reset: Rc::clone(&reset),
        };
        let result = Session::connect(transport, fast(), CacheConfig::default());
        assert!(matches!(
            result,
            Err(NetError::HandshakeTimeout {
                stage: HandshakeStage::Connect,
                attempts: 3
            })
        ));
        assert!(reset.get());
    }

    #[test]
    fn authority_gone_during_handshake() {
        let (client, server) = memory_pair();
        drop(server);
        assert!(matches!(
            Session::connect(client, fast(), CacheConfig::default()),
            Err(NetError::Disconnected)
        ));
    }

    #[test]
    fn authority_leaving_before_init_ends_the_handshake() {
        let (client, mut server) = memory_pair();
        server.reset();
        assert!(matches!(
            Session::connect(client, fast(), CacheConfig::default()),
            Err(NetError::Disconnected)
        ));
    }

    #[test]
    fn incompatible_version_is_rejected() {
        let (client, mut server) = memory_pair();
        send(
            &mut server,
            &ServerMessage::Init {
                version: ProtocolVersion::new(3, 0, 0),
                name: "future".into(),
                tick_rate: 20,
            },
        );
        assert!(matches!(
            Session::connect(client, fast(), CacheConfig::default()),
            Err(NetError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn tick_requests_window_then_applies_loads() {
        let (mut session, mut server) = connected(1);
        client_messages(&mut server);
        let observer = FixedObserver::new(CellCoord::ZERO, 1);

        let report = session.tick(&observer, &mut ()).unwrap();
        assert_eq!(report.requested, 27);
        let requested = match client_messages(&mut server).as_slice() {
            [ClientMessage::MapRequest { cells }] => cells.clone(),
            other => panic!("expected one map request, got {other:?}"),
        };
        assert_eq!(requested[0], CellCoord::ZERO);

        send(&mut server, &ServerMessage::Tick { observer: Some([1.0, 2.0, 3.0]) });
        for &coord in &requested {
            send(&mut server, &ServerMessage::CellLoad { coord, elements: vec![face()] });
        }
        let report = session.tick(&observer, &mut ()).unwrap();
        assert_eq!(report.loaded, 27);
        assert_eq!(report.requested, 0);
        assert!(report.received_tick);
        assert_eq!(session.last_observer_position(), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(session.cache().snapshot().loaded_count(), 27);
        assert_eq!(session.cache().pending_count(), 0);
    }

    #[test]
    fn failed_map_request_is_sent_again() {
        let (client, mut server) = memory_pair();
        greet(&mut server);
        let fail_sends = Rc::new(Cell::new(false));
        let transport = FlakyTransport {
            inner: client,
            fail_sends: Rc::clone(&fail_sends),
        };
        let mut session =
            Session::connect(transport, fast(), CacheConfig::default().with_radius(1)).unwrap();
        client_messages(&mut server);
        let observer = FixedObserver::new(CellCoord::ZERO, 1);

        fail_sends.set(true);
        assert!(matches!(session.tick(&observer, &mut ()), Err(NetError::Io(_))));
        assert_eq!(session.cache().pending_count(), 0);
        assert_eq!(session.cache().tracker().queued_count(), 27);
        assert_eq!(session.state(), SessionState::Connected);

        fail_sends.set(false);
        let report = session.tick(&observer, &mut ()).unwrap();
        assert_eq!(report.requested, 27);
        assert_eq!(session.cache().pending_count(), 27);
        match client_messages(&mut server).as_slice() {
            [ClientMessage::MapRequest { cells }] => assert_eq!(cells.len(), 27),
            other => panic!("expected one map request, got {other:?}"),
        }
    }

    #[test]
    fn radius_changes_follow_the_observer() {
        let (mut session, mut server) = connected(1);
        let small = FixedObserver::new(CellCoord::ZERO, 1);
        session.tick(&small, &mut ()).unwrap();
        for coord in session.cache().window().coords().collect::<Vec<_>>() {
            send(&mut server, &ServerMessage::CellLoad { coord, elements: vec![face()] });
        }
        session.tick(&small, &mut ()).unwrap();
        client_messages(&mut server);

        let large = FixedObserver::new(CellCoord::ZERO, 2);
        let report = session.tick(&large, &mut ()).unwrap();
        assert_eq!(session.cache().window().radius, 2);
        assert_eq!(report.evicted, 0);
        assert_eq!(report.requested, 64);
        let report = session.tick(&large, &mut ()).unwrap();
        assert_eq!(report.requested, 125 - 27 - 64);
        assert_eq!(session.cache().snapshot().loaded_count(), 27);

        let mut evicted = 0;
        let report = session
            .tick(&small, &mut |_: CellCoord, _: &CellSlot| evicted += 1)
            .unwrap();
        assert_eq!(session.cache().window().radius, 1);
        assert_eq!(report.evicted, 0);
        assert_eq!(evicted, 0);
        assert_eq!(session.cache().pending_count(), 0);
        assert_eq!(session.cache().snapshot().loaded_count(), 27);
    }

    #[test]
    fn malformed_and_invalid_messages_are_dropped() {
        let (mut session, mut server) = connected(0);
        let observer = FixedObserver::new(CellCoord::ZERO, 0);
        session.tick(&observer, &mut ()).unwrap();

        server.send_frame(&[0xff, 0xff, 0xff]).unwrap();
        send(
            &mut server,
            &ServerMessage::CellUpdate {
                coord: CellCoord::ZERO,
                removed_positions: vec![0],
                added: vec![],
            },
        );
        send(
            &mut server,
            &ServerMessage::CellLoad {
                coord: CellCoord::new(9, 9, 9),
                elements: vec![face()],
            },
        );
        send(&mut server, &ServerMessage::CellLoad { coord: CellCoord::ZERO, elements: vec![face()] });

        let report = session.tick(&observer, &mut ()).unwrap();
        assert_eq!(report.messages, 4);
        assert_eq!(report.dropped, 3);
        assert_eq!(report.loaded, 1);
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn observer_move_evicts_through_sink() {
        let (mut session, mut server) = connected(1);
        session
            .tick(&FixedObserver::new(CellCoord::ZERO, 1), &mut ())
            .unwrap();
        for coord in session.cache().window().coords().collect::<Vec<_>>() {
            send(&mut server, &ServerMessage::CellLoad { coord, elements: vec![face()] });
        }
        session
            .tick(&FixedObserver::new(CellCoord::ZERO, 1), &mut ())
            .unwrap();
        client_messages(&mut server);

        let mut evicted = Vec::new();
        let report = session
            .tick(
                &FixedObserver::new(CellCoord::new(1, 0, 0), 1),
                &mut |coord: CellCoord, _: &CellSlot| evicted.push(coord),
            )
            .unwrap();
        assert_eq!(report.evicted, 9);
        assert_eq!(report.requested, 9);
        assert!(evicted.iter().all(|c| c.x == -1));
    }

    #[test]
    fn server_goodbye_closes_session() {
        let (mut session, mut server) = connected(0);
        send(&mut server, &ServerMessage::Goodbye);
        let report = session
            .tick(&FixedObserver::new(CellCoord::ZERO, 0), &mut ())
            .unwrap();
        assert!(report.closed);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.tick(&FixedObserver::new(CellCoord::ZERO, 0), &mut ()),
            Err(NetError::InvalidState(_))
        ));
        assert_eq!(session.disconnect(), DisconnectOutcome::Graceful);
    }

    #[test]
    fn disconnect_is_graceful_when_acknowledged() {
        let (session, mut server) = connected(0);
        send(&mut server, &ServerMessage::Goodbye);
        assert_eq!(session.disconnect(), DisconnectOutcome::Graceful);
        assert!(client_messages(&mut server).contains(&ClientMessage::Goodbye));
    }

    #[test]
    fn disconnect_is_forced_without_acknowledgement() {
        let (session, _server) = connected(0);
        assert_eq!(session.disconnect(), DisconnectOutcome::Forced);
    }
}
