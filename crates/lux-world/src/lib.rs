//! Windowed cell cache for the Lux streaming client.
//!
//! The cache keeps every cell within a cubic window around the observer in a
//! flat slot array, migrates live cells when the window moves or resizes,
//! deduplicates outstanding requests and applies full loads and incremental
//! element deltas coming from the authority.

pub mod cache;
pub mod error;
pub mod generation;
pub mod mesh;
pub mod reflow;
pub mod store;
pub mod tracker;
pub mod window;

pub use cache::{CacheConfig, CellCache, CellEvictionSink, FixedObserver, ObserverFeed};
pub use error::{ApplyError, MeshError};
pub use generation::{TerrainConfig, TerrainGenerator};
pub use mesh::{CellMesh, MeshVertex};
pub use reflow::{reflow, ReflowReport};
pub use store::{CellSlot, CellState, CellStore};
pub use tracker::RequestTracker;
pub use window::{CellBounds, Window};

/// World seed for procedural generation.
pub type WorldSeed = u64;
