//! Local development authority for the Lux streaming client.
//!
//! Serves procedurally generated cells over TCP and walks a scripted observer
//! around a circle so connected clients keep streaming.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p lux-authority -- --port 4280 --seed 7
//! ```

mod server;

use std::thread;
use std::time::{Duration, Instant};

use lux_net::DEFAULT_PORT;
use lux_world::{TerrainGenerator, WorldSeed};
use tracing::info;
use tracing_subscriber::EnvFilter;

use server::AuthorityServer;

/// Radius of the observer's path in world units.
const PATH_RADIUS: f32 = 96.0;

/// World units the observer covers per tick.
const PATH_SPEED: f32 = 0.5;

/// Command line options.
#[derive(Debug, Clone)]
struct AuthorityArgs {
    port: u16,
    seed: WorldSeed,
    tick_rate: u32,
    name: String,
    /// Ticks to run; 0 runs until killed.
    ticks: u64,
}

impl Default for AuthorityArgs {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            seed: 0,
            tick_rate: 20,
            name: String::from("lux-authority"),
            ticks: 0,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = parse_args();
    let generator = TerrainGenerator::with_seed(args.seed);
    let tick_rate = args.tick_rate.max(1);
    let interval = Duration::from_secs(1) / tick_rate;
    let mut server = AuthorityServer::bind(args.port, generator, args.name, tick_rate)?;

    let mut tick = 0u64;
    while args.ticks == 0 || tick < args.ticks {
        let started = Instant::now();
        let observer = observer_at(server.generator(), tick);
        server.tick(observer);
        tick += 1;
        if tick % (u64::from(tick_rate) * 10) == 0 {
            info!(tick, clients = server.client_count(), "authority running");
        }
        let elapsed = started.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }

    server.shutdown();
    Ok(())
}

/// Observer position on the scripted path: a circle two units above the terrain.
fn observer_at(generator: &TerrainGenerator, tick: u64) -> [f32; 3] {
    let angle = tick as f32 * PATH_SPEED / PATH_RADIUS;
    let x = PATH_RADIUS * angle.cos();
    let z = PATH_RADIUS * angle.sin();
    let ground = generator.height_at(x.floor() as i64, z.floor() as i64);
    [x, ground as f32 + 2.0, z]
}

fn parse_args() -> AuthorityArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = AuthorityArgs::default();

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--port" | "-p" => {
                if let Some(port) = value.and_then(|v| v.parse().ok()) {
                    parsed.port = port;
                    i += 1;
                }
            }
            "--seed" | "-s" => {
                if let Some(seed) = value.and_then(|v| v.parse().ok()) {
                    parsed.seed = seed;
                    i += 1;
                }
            }
            "--tick-rate" => {
                if let Some(rate) = value.and_then(|v| v.parse().ok()) {
                    parsed.tick_rate = rate;
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
            "--help" => {
                println!("Lux development authority");
                println!();
                println!("Usage: lux-authority [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -p, --port <PORT>       Port to listen on (default: {DEFAULT_PORT})");
                println!("  -s, --seed <SEED>       Terrain seed (default: 0)");
                println!("      --tick-rate <HZ>    Server ticks per second (default: 20)");
                println!("  -n, --name <NAME>       Name announced to clients");
                println!("      --ticks <N>         Stop after N ticks (default: run until killed)");
                println!("      --help              Show this help message");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    parsed
}
