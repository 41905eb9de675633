//! Headless Lux streaming client.
//!
//! Connects to an authority, follows the observer position the authority
//! reports and keeps the surrounding cells cached, logging what a renderer
//! would upload and release.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p lux-client
//! cargo run -p lux-client -- --host 127.0.0.1 --port 4280 --radius 3 --ticks 600
//! ```

mod renderer;

use std::thread;
use std::time::{Duration, Instant};

use glam::Vec3;
use lux_core::CellCoord;
use lux_net::{Session, SessionConfig, TcpTransport, DEFAULT_PORT};
use lux_world::{CacheConfig, ObserverFeed};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use renderer::LogRenderer;

/// Default host to connect to.
const DEFAULT_HOST: &str = "127.0.0.1";

/// Timeout for the TCP connect itself.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Command line options.
#[derive(Debug, Clone)]
struct ClientArgs {
    host: String,
    port: u16,
    radius: u32,
    max_requests: usize,
    name: String,
    /// Ticks to run; 0 runs until the authority closes the connection.
    ticks: u64,
    /// Used when the authority announces a tick rate of 0.
    tick_rate: u32,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            radius: CacheConfig::default().radius,
            max_requests: CacheConfig::default().max_requests_per_tick,
            name: SessionConfig::default().client_name,
            ticks: 0,
            tick_rate: 20,
        }
    }
}

/// Observer that follows the position the authority reports.
struct ServerObserver {
    center: CellCoord,
    radius: u32,
}

impl ServerObserver {
    fn update(&mut self, position: Option<Vec3>) {
        if let Some(position) = position {
            self.center = CellCoord::from_world(position);
        }
    }
}

impl ObserverFeed for ServerObserver {
    fn current_center(&self) -> CellCoord {
        self.center
    }

    fn current_radius(&self) -> u32 {
        self.radius
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args();
    info!(host = %args.host, port = args.port, radius = args.radius, "starting client");

    let transport = TcpTransport::connect((args.host.as_str(), args.port), CONNECT_TIMEOUT)?;
    let mut session = Session::connect(
        transport,
        SessionConfig::default().with_client_name(args.name.clone()),
        CacheConfig::default()
            .with_radius(args.radius)
            .with_max_requests_per_tick(args.max_requests),
    )?;

    run(&mut session, &args)?;

    if session.state() == lux_net::SessionState::Connected {
        session.disconnect();
    }
    Ok(())
}

fn run(session: &mut Session<TcpTransport>, args: &ClientArgs) -> anyhow::Result<()> {
    let tick_rate = match session.tick_rate() {
        0 => args.tick_rate.max(1),
        rate => rate,
    };
    let interval = Duration::from_secs(1) / tick_rate;
    info!(server = session.server_name(), tick_rate, "streaming");

    let mut observer = ServerObserver {
        center: CellCoord::ZERO,
        radius: args.radius,
    };
    let mut renderer = LogRenderer::new();
    let mut tick = 0u64;

    loop {
        let started = Instant::now();

        let report = session.tick(&observer, &mut renderer)?;
        if report.closed {
            info!(tick, "authority ended the session");
            return Ok(());
        }
        renderer.present(session.cache());
        observer.update(session.last_observer_position());

        tick += 1;
        if args.ticks != 0 && tick >= args.ticks {
            return Ok(());
        }

        let elapsed = started.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        } else {
            warn!(tick, ?elapsed, "tick overran its budget");
        }
    }
}

fn parse_args() -> ClientArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ClientArgs::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--host" | "-h" => {
                if let Some(host) = value {
                    parsed.host.clone_from(host);
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if let Some(port) = value.and_then(|v| v.parse().ok()) {
                    parsed.port = port;
                    i += 1;
                }
            }
            "--radius" | "-r" => {
                if let Some(radius) = value.and_then(|v| v.parse().ok()) {
                    parsed.radius = radius;
                    i += 1;
                }
            }
            "--max-requests" => {
                if let Some(max) = value.and_then(|v| v.parse().ok()) {
                    parsed.max_requests = max;
                    i += 1;
                }
            }
            "--name" | "-n" => {
                if let Some(name) = value {
                    parsed.name.clone_from(name);
                    i += 1;
                }
            }
            "--ticks" => {
                if let Some(ticks) = value.and_then(|v| v.parse().ok()) {
                    parsed.ticks = ticks;
                    i += 1;
                }
            }
            "--tick-rate" => {
                if let Some(rate) = value.and_then(|v| v.parse().ok()) {
                    parsed.tick_rate = rate;
                    i += 1;
                }
            }
            "--help" => {
                println!("Lux streaming client");
                println!();
                println!("Usage: lux-client [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --host <HOST>       Authority host (default: {DEFAULT_HOST})");
                println!("  -p, --port <PORT>       Authority port (default: {DEFAULT_PORT})");
                println!("  -r, --radius <CELLS>    Window radius in cells (default: 2)");
                println!("      --max-requests <N>  Cell requests sent per tick (default: 64)");
                println!("  -n, --name <NAME>       Name announced to the authority");
                println!("      --ticks <N>         Stop after N ticks (default: run until closed)");
                println!("      --tick-rate <HZ>    Tick rate if the authority announces none");
                println!("      --help              Show this help message");
                std::process::exit(0);
            }
            other => warn!(argument = other, "ignoring unknown argument"),
        }
        i += 1;
    }

    parsed
}
