//! Test harness for the Lux streaming client.
//!
//! Provides a scripted in-memory authority and a recording eviction sink so
//! whole sessions can be driven tick by tick without a network.

pub mod harness;

pub use harness::{connect, RecordingSink, TestAuthority};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("network error: {0}")]
    Net(#[from] lux_net::NetError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("timed out: {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Session settings tuned for tests: short handshake and disconnect waits.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub session: lux_net::SessionConfig,
    pub cache: lux_world::CacheConfig,
    /// Seed for the authority's terrain.
    pub seed: lux_world::WorldSeed,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        use std::time::Duration;

        Self {
            session: lux_net::SessionConfig::default()
                .with_client_name("lux-test")
                .with_connect_retries(10, Duration::from_millis(5))
                .with_disconnect_retries(10, Duration::from_millis(5)),
            cache: lux_world::CacheConfig::default(),
            seed: 42,
        }
    }
}
