//! Stand-in renderer that logs what a GPU renderer would upload and release.

use hashbrown::HashMap;
use lux_core::CellCoord;
use lux_world::{CellCache, CellEvictionSink, CellSlot, MeshVertex};
use tracing::{debug, info};

/// What was last "uploaded" for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Upload {
    elements: usize,
    bytes: usize,
}

/// Tracks per-cell buffers the way a GPU renderer would, without a GPU.
#[derive(Debug, Default)]
pub struct LogRenderer {
    uploads: HashMap<CellCoord, Upload>,
    frames: u64,
    released: usize,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the cache between ticks and upload anything new or changed.
    pub fn present(&mut self, cache: &CellCache) {
        self.frames += 1;
        let mut uploaded = 0;
        for (coord, slot) in cache.snapshot().iter_loaded() {
            let mesh = slot.mesh();
            let vertices = mesh.vertices();
            let upload = Upload {
                elements: mesh.len(),
                bytes: bytemuck::cast_slice::<MeshVertex, u8>(&vertices).len()
                    + bytemuck::cast_slice::<u32, u8>(mesh.indices()).len(),
            };
            if self.uploads.insert(coord, upload) != Some(upload) {
                uploaded += 1;
                debug!(%coord, elements = upload.elements, bytes = upload.bytes, "uploaded cell");
            }
        }

        if uploaded > 0 || self.frames % 100 == 0 {
            let bytes: usize = self.uploads.values().map(|u| u.bytes).sum();
            info!(
                frame = self.frames,
                window = %cache.window().center,
                cells = self.uploads.len(),
                elements = cache.snapshot().element_count(),
                uploaded,
                released = self.released,
                pending = cache.pending_count(),
                bytes,
                "frame"
            );
        }
    }
}

impl CellEvictionSink for LogRenderer {
    fn on_evict(&mut self, coord: CellCoord, slot: &CellSlot) {
        if let Some(upload) = self.uploads.remove(&coord) {
            self.released += 1;
            debug!(%coord, elements = slot.mesh().len(), bytes = upload.bytes, "released cell");
        }
    }
}
