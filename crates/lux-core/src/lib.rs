//! Core types for the Lux streaming client.
//!
//! This crate provides the foundational types shared by the cache and the
//! network layer:
//! - Cell coordinates and sub-cell positions
//! - Elements (oriented faces) and their materials
//! - Engine-wide constants and error types

pub mod coords;
pub mod error;
pub mod types;

pub use coords::{CellCoord, LocalPos};
pub use error::{Error, Result};
pub use types::{Axis, Element, MaterialId, Orientation};

/// Engine-wide constants
pub mod constants {
    /// Size of a cell in sub-cell units per axis
    pub const CELL_SIZE: usize = 16;
    /// Total sub-cell units in a cell (16^3)
    pub const CELL_VOLUME: usize = CELL_SIZE * CELL_SIZE * CELL_SIZE;
    /// Bits needed to represent a position within a cell (4 bits for 0-15)
    pub const CELL_BITS: u32 = 4;
    /// Vertices emitted per element (one quad)
    pub const VERTICES_PER_ELEMENT: u32 = 4;
    /// Index fan-out per element (two triangles per quad)
    pub const INDICES_PER_ELEMENT: usize = 6;
}
