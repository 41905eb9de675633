//! Cache error types.

use lux_core::CellCoord;
use thiserror::Error;

/// Rejected load or delta payload. The target mesh is left untouched.
#[derive(Error, Debug)]
pub enum MeshError {
    /// A removed position does not name an existing element.
    #[error("removed element {position} out of range (cell has {len} elements)")]
    RemovedOutOfRange { position: u32, len: usize },

    /// The same position appears twice in one delta.
    #[error("element {position} removed more than once")]
    DuplicateRemoval { position: u32 },

    /// More elements than a cell can hold.
    #[error("cell would hold {count} elements (max {max})")]
    TooManyElements { count: usize, max: usize },

    /// An element failed validation.
    #[error("invalid element: {0}")]
    InvalidElement(#[from] lux_core::Error),
}

/// Inbound message that cannot be applied to the cache.
///
/// These are protocol errors: the caller logs them and drops the message.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// The coordinate is not inside the current window (late or stray response).
    #[error("cell {0} is outside the window")]
    OutOfWindow(CellCoord),

    /// Full load for a slot that already holds data.
    #[error("cell {0} is already loaded")]
    AlreadyLoaded(CellCoord),

    /// Delta for a slot that holds no data.
    #[error("cell {0} is not loaded")]
    NotLoaded(CellCoord),

    /// The slot addressed by the coordinate holds another cell.
    #[error("slot for cell {expected} holds cell {found}")]
    CoordMismatch {
        expected: CellCoord,
        found: CellCoord,
    },

    /// The payload itself is invalid.
    #[error("cell {coord}: {source}")]
    Mesh {
        coord: CellCoord,
        #[source]
        source: MeshError,
    },
}
