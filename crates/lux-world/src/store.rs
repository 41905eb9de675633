//! Fixed-capacity slot array covering one window.

use lux_core::{CellCoord, Element};

use crate::error::MeshError;
use crate::mesh::CellMesh;
use crate::window::Window;

/// Whether a slot holds cell data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CellState {
    /// No data; the cell has not been received yet.
    #[default]
    Empty,
    /// Fully materialized from a full load, possibly patched by deltas since.
    Loaded,
}

/// One slot of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellSlot {
    /// Owning coordinate; only meaningful while loaded.
    coord: CellCoord,
    state: CellState,
    mesh: CellMesh,
}

impl CellSlot {
    /// Create an empty slot.
    pub const fn empty() -> Self {
        Self {
            coord: CellCoord::ZERO,
            state: CellState::Empty,
            mesh: CellMesh::new(),
        }
    }

    /// Current state.
    pub const fn state(&self) -> CellState {
        self.state
    }

    /// Returns true if the slot holds cell data.
    pub fn is_loaded(&self) -> bool {
        self.state == CellState::Loaded
    }

    /// Coordinate of the loaded cell, `None` while empty.
    pub fn coord(&self) -> Option<CellCoord> {
        self.is_loaded().then_some(self.coord)
    }

    /// Element data and index buffer.
    pub const fn mesh(&self) -> &CellMesh {
        &self.mesh
    }

    /// Materialize the slot from a full element list.
    pub(crate) fn load(&mut self, coord: CellCoord, elements: Vec<Element>) -> Result<(), MeshError> {
        self.mesh.rebuild(elements)?;
        self.coord = coord;
        self.state = CellState::Loaded;
        Ok(())
    }

    pub(crate) fn mesh_mut(&mut self) -> &mut CellMesh {
        &mut self.mesh
    }

    /// Drop all content.
    pub(crate) fn reset(&mut self) {
        *self = Self::empty();
    }
}

/// Slot array indexed through a [`Window`].
///
/// Holds exactly one slot per in-window coordinate.
#[derive(Debug, Clone)]
pub struct CellStore {
    window: Window,
    slots: Vec<CellSlot>,
}

impl CellStore {
    /// Create a store of empty slots for the given window.
    pub fn new(window: Window) -> Self {
        Self {
            window,
            slots: vec![CellSlot::empty(); window.volume()],
        }
    }

    pub(crate) fn from_parts(window: Window, slots: Vec<CellSlot>) -> Self {
        debug_assert_eq!(slots.len(), window.volume());
        Self { window, slots }
    }

    pub(crate) fn into_parts(self) -> (Window, Vec<CellSlot>) {
        (self.window, self.slots)
    }

    /// Window this store covers.
    pub const fn window(&self) -> Window {
        self.window
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Always false; a store has at least one slot.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot addressed by `coord`, or `None` when out of window.
    pub fn get(&self, coord: CellCoord) -> Option<&CellSlot> {
        self.window.slot_of(coord).map(|index| &self.slots[index])
    }

    pub(crate) fn get_mut(&mut self, coord: CellCoord) -> Option<&mut CellSlot> {
        self.window.slot_of(coord).map(|index| &mut self.slots[index])
    }

    /// Returns true if `coord` is in the window and its slot is loaded with it.
    pub fn is_loaded(&self, coord: CellCoord) -> bool {
        self.get(coord)
            .is_some_and(|slot| slot.coord() == Some(coord))
    }

    /// Number of loaded slots.
    pub fn loaded_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_loaded()).count()
    }

    /// Iterate every slot with the coordinate it covers.
    ///
    /// Slots beyond the `i32` coordinate range cover nothing and are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (CellCoord, &CellSlot)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| self.window.coord_of(index).map(|coord| (coord, slot)))
    }

    /// Iterate loaded slots.
    pub fn iter_loaded(&self) -> impl Iterator<Item = (CellCoord, &CellSlot)> + '_ {
        self.iter().filter(|(_, slot)| slot.is_loaded())
    }

    /// Coordinates of all empty slots.
    pub fn missing(&self) -> impl Iterator<Item = CellCoord> + '_ {
        self.iter()
            .filter(|(_, slot)| !slot.is_loaded())
            .map(|(coord, _)| coord)
    }

    /// Total elements across loaded slots.
    pub fn element_count(&self) -> usize {
        self.slots.iter().map(|slot| slot.mesh().len()).sum()
    }
}

impl Default for CellStore {
    fn default() -> Self {
        Self::new(Window::new(CellCoord::ZERO, 0))
    }
}
