//! Migration of a cell store between windows.
//!
//! Only the overlap of the old and new windows can hold surviving cells, so
//! the overlap box is walked once and its slots are moved to their new
//! indices. Whatever is still loaded in the old array afterwards has left the
//! window and is evicted; every new slot outside the overlap starts empty.

use tracing::debug;

use crate::cache::CellEvictionSink;
use crate::store::{CellSlot, CellStore};
use crate::window::Window;

/// What a reflow did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReflowReport {
    /// Loaded cells moved into the new store.
    pub retained: usize,
    /// Loaded cells that left the window.
    pub evicted: usize,
    /// Coordinates of the new window that were not part of the old one.
    pub entered: usize,
}

/// Move `store` onto `new_window`.
///
/// Loaded slots whose coordinate stays in the window keep their content
/// unchanged; the rest are handed to `sink` and dropped. Never fails, handles
/// any relative shift (including none, and shifts larger than the window) and
/// any change of radius.
pub fn reflow<S>(store: CellStore, new_window: Window, sink: &mut S) -> (CellStore, ReflowReport)
where
    S: CellEvictionSink + ?Sized,
{
    let old_window = store.window();
    if old_window == new_window {
        let retained = store.loaded_count();
        return (
            store,
            ReflowReport {
                retained,
                ..ReflowReport::default()
            },
        );
    }

    let (_, mut old_slots) = store.into_parts();
    let mut new_slots = vec![CellSlot::empty(); new_window.volume()];
    let mut report = ReflowReport::default();

    let overlap = old_window.intersection(&new_window);
    if let Some(bounds) = overlap {
        for coord in bounds.iter() {
            let (Some(from), Some(to)) = (old_window.slot_of(coord), new_window.slot_of(coord))
            else {
                continue;
            };
            let slot = std::mem::take(&mut old_slots[from]);
            if slot.is_loaded() {
                report.retained += 1;
            }
            new_slots[to] = slot;
        }
    }

    for slot in &mut old_slots {
        if let Some(coord) = slot.coord() {
            sink.on_evict(coord, slot);
            slot.reset();
            report.evicted += 1;
        }
    }

    report.entered = new_window.bounds().volume() - overlap.map_or(0, |bounds| bounds.volume());

    debug!(
        old_center = %old_window.center,
        old_radius = old_window.radius,
        new_center = %new_window.center,
        new_radius = new_window.radius,
        retained = report.retained,
        evicted = report.evicted,
        entered = report.entered,
        "reflowed cell store"
    );

    (CellStore::from_parts(new_window, new_slots), report)
}
