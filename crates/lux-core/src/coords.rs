//! Coordinate systems for the streamed world.

use crate::constants::{CELL_BITS, CELL_SIZE};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Position of a sub-cell unit within a cell (0 to CELL_SIZE-1 per axis).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize,
)]
#[repr(C)]
pub struct LocalPos {
    pub x: u8,
    pub y: u8,
    pub z: u8,
    pub _pad: u8,
}

impl LocalPos {
    /// Create a new local position
    #[inline]
    pub const fn new(x: u8, y: u8, z: u8) -> Self {
        debug_assert!((x as usize) < CELL_SIZE);
        debug_assert!((y as usize) < CELL_SIZE);
        debug_assert!((z as usize) < CELL_SIZE);
        Self { x, y, z, _pad: 0 }
    }

    /// Convert to linear index for flat array storage
    #[inline]
    pub const fn to_index(self) -> usize {
        self.x as usize
            + (self.y as usize) * CELL_SIZE
            + (self.z as usize) * CELL_SIZE * CELL_SIZE
    }

    /// Create from linear index
    #[inline]
    pub const fn from_index(index: usize) -> Self {
        let x = (index % CELL_SIZE) as u8;
        let y = ((index / CELL_SIZE) % CELL_SIZE) as u8;
        let z = (index / (CELL_SIZE * CELL_SIZE)) as u8;
        Self { x, y, z, _pad: 0 }
    }
}

/// Cell position in cell coordinates.
///
/// Ordered lexicographically by `x`, then `y`, then `z`.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Pod,
    Zeroable,
    Serialize,
    Deserialize,
)]
#[repr(C)]
pub struct CellCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellCoord {
    /// The origin cell.
    pub const ZERO: Self = Self::new(0, 0, 0);

    /// Create a new cell coordinate
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Get the cell containing a world-space position.
    ///
    /// Uses floor division so negative positions map to negative cells.
    #[inline]
    pub fn from_world(pos: Vec3) -> Self {
        let axis = |v: f32| {
            (v.floor() as i64 >> CELL_BITS).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
        };
        Self::new(axis(pos.x), axis(pos.y), axis(pos.z))
    }

    /// Translate by the given per-axis offsets, saturating at the `i32` range.
    #[inline]
    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.z.saturating_add(dz),
        )
    }

    /// Largest per-axis distance to another coordinate.
    #[inline]
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        let dz = self.z.abs_diff(other.z);
        dx.max(dy).max(dz)
    }

    /// Squared euclidean distance to another coordinate, saturating at `u64::MAX`.
    #[inline]
    pub fn distance_squared(self, other: Self) -> u64 {
        let dx = u64::from(self.x.abs_diff(other.x));
        let dy = u64::from(self.y.abs_diff(other.y));
        let dz = u64::from(self.z.abs_diff(other.z));
        (dx * dx).saturating_add(dy * dy).saturating_add(dz * dz)
    }
}

impl std::fmt::Display for CellCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}
