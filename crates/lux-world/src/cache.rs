//! The owned cell cache: store, window and outstanding requests in one place.

use lux_core::{CellCoord, Element};
use tracing::{debug, warn};

use crate::error::ApplyError;
use crate::reflow::{reflow, ReflowReport};
use crate::store::{CellSlot, CellStore};
use crate::tracker::RequestTracker;
use crate::window::Window;

/// Receives every loaded cell that leaves the window, before its slot is reset.
///
/// Renderers use this to release per-cell GPU resources.
pub trait CellEvictionSink {
    fn on_evict(&mut self, coord: CellCoord, slot: &CellSlot);
}

impl<F> CellEvictionSink for F
where
    F: FnMut(CellCoord, &CellSlot),
{
    fn on_evict(&mut self, coord: CellCoord, slot: &CellSlot) {
        self(coord, slot);
    }
}

impl CellEvictionSink for () {
    fn on_evict(&mut self, _coord: CellCoord, _slot: &CellSlot) {}
}

/// Source of the observer's position, polled once per tick.
pub trait ObserverFeed {
    /// Cell the window should be centered on.
    fn current_center(&self) -> CellCoord;

    /// Window radius in cells.
    fn current_radius(&self) -> u32;

    /// Window described by this feed.
    fn window(&self) -> Window {
        Window::new(
            self.current_center(),
            self.current_radius().min(Window::MAX_RADIUS),
        )
    }
}

/// Observer that stays where it is put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedObserver {
    pub center: CellCoord,
    pub radius: u32,
}

impl FixedObserver {
    /// Create a new fixed observer.
    pub const fn new(center: CellCoord, radius: u32) -> Self {
        Self { center, radius }
    }
}

impl ObserverFeed for FixedObserver {
    fn current_center(&self) -> CellCoord {
        self.center
    }

    fn current_radius(&self) -> u32 {
        self.radius
    }
}

/// Configuration for the cell cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Window radius in cells (clamped to [`Window::MAX_RADIUS`]).
    pub radius: u32,
    /// Maximum cell requests handed to the network per tick.
    pub max_requests_per_tick: usize,
    /// Ticks to wait before re-requesting a cell the authority could not provide.
    pub failure_retry_ticks: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            radius: 2,
            max_requests_per_tick: 64,
            failure_retry_ticks: 30,
        }
    }
}

impl CacheConfig {
    /// Set the window radius.
    pub fn with_radius(mut self, radius: u32) -> Self {
        self.radius = radius;
        self
    }

    /// Set the per-tick request cap.
    pub fn with_max_requests_per_tick(mut self, max: usize) -> Self {
        self.max_requests_per_tick = max;
        self
    }

    /// Set the retry delay after a failed request.
    pub fn with_failure_retry_ticks(mut self, ticks: u64) -> Self {
        self.failure_retry_ticks = ticks;
        self
    }
}

/// Cell cache kept in sync with the authority.
///
/// The single writer of cell state: the network dispatch feeds responses in
/// through [`Self::on_full_load`] / [`Self::on_delta`], the tick loop moves the
/// window through [`Self::update_window`], and the renderer reads
/// [`Self::snapshot`] between ticks.
#[derive(Debug)]
pub struct CellCache {
    config: CacheConfig,
    store: CellStore,
    tracker: RequestTracker,
    tick: u64,
    /// Every empty slot must be checked on the next [`Self::request_missing`].
    rescan: bool,
    /// Coordinates that entered the window since the last request pass.
    entered: Vec<CellCoord>,
}

impl CellCache {
    /// Create an empty cache centered on `center`.
    pub fn new(config: CacheConfig, center: CellCoord) -> Self {
        let radius = if config.radius > Window::MAX_RADIUS {
            warn!(
                radius = config.radius,
                max = Window::MAX_RADIUS,
                "window radius clamped"
            );
            Window::MAX_RADIUS
        } else {
            config.radius
        };
        let tracker = RequestTracker::new(config.failure_retry_ticks);
        Self {
            store: CellStore::new(Window::new(center, radius)),
            config,
            tracker,
            tick: 0,
            rescan: true,
            entered: Vec::new(),
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current window.
    pub fn window(&self) -> Window {
        self.store.window()
    }

    /// Read view of every slot, for the renderer.
    pub fn snapshot(&self) -> &CellStore {
        &self.store
    }

    /// Request bookkeeping.
    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Number of sent, unanswered requests.
    pub fn pending_count(&self) -> usize {
        self.tracker.pending_count()
    }

    /// Current tick number.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance the tick counter and return the new tick number.
    pub fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Move the window, evicting cells that leave it and forgetting requests
    /// for coordinates no longer inside.
    pub fn update_window<S>(&mut self, window: Window, sink: &mut S) -> ReflowReport
    where
        S: CellEvictionSink + ?Sized,
    {
        if window == self.store.window() {
            return ReflowReport {
                retained: self.store.loaded_count(),
                ..ReflowReport::default()
            };
        }
        let old_window = self.store.window();
        let store = std::mem::take(&mut self.store);
        let (store, report) = reflow(store, window, sink);
        self.store = store;
        self.tracker.cancel_out_of_window(&window);

        if !self.rescan {
            if self.entered.len() + report.entered > self.store.len() {
                self.entered.clear();
                self.rescan = true;
            } else {
                self.entered.extend(
                    window
                        .bounds()
                        .iter()
                        .filter(|&coord| !old_window.contains(coord)),
                );
            }
        }
        report
    }

    /// Move the window to wherever `observer` currently is.
    pub fn follow<O, S>(&mut self, observer: &O, sink: &mut S) -> ReflowReport
    where
        O: ObserverFeed + ?Sized,
        S: CellEvictionSink + ?Sized,
    {
        self.update_window(observer.window(), sink)
    }

    /// Queue a request for every empty in-window cell not already tracked.
    ///
    /// Only cells that entered the window since the last call and cells whose
    /// retry delay ran out are considered; the first call checks every slot.
    /// Returns the number of newly queued requests.
    pub fn request_missing(&mut self) -> usize {
        let mut candidates = self.tracker.take_due_retries(self.tick);
        if std::mem::take(&mut self.rescan) {
            self.entered.clear();
            candidates.extend(self.store.missing());
        } else {
            candidates.append(&mut self.entered);
        }
        let mut queued = 0;
        for coord in candidates {
            if self.tracker.want(coord, &self.store, self.tick) {
                queued += 1;
            }
        }
        queued
    }

    /// Queue a request for a single cell. See [`RequestTracker::want`].
    pub fn want(&mut self, coord: CellCoord) -> bool {
        self.tracker.want(coord, &self.store, self.tick)
    }

    /// Take the next batch of requests to send, closest to the window center first.
    pub fn take_requests(&mut self) -> Vec<CellCoord> {
        let center = self.store.window().center;
        self.tracker
            .take_batch(center, self.config.max_requests_per_tick)
    }

    /// Return a batch from [`Self::take_requests`] that could not be sent.
    pub fn requeue(&mut self, coords: &[CellCoord]) -> usize {
        self.tracker.requeue(coords)
    }

    /// Apply a full load for `coord`.
    pub fn on_full_load(
        &mut self,
        coord: CellCoord,
        elements: Vec<Element>,
    ) -> Result<(), ApplyError> {
        self.tracker.fulfilled(coord);

        let slot = self
            .store
            .get_mut(coord)
            .ok_or(ApplyError::OutOfWindow(coord))?;
        if let Some(found) = slot.coord() {
            return Err(if found == coord {
                ApplyError::AlreadyLoaded(coord)
            } else {
                ApplyError::CoordMismatch {
                    expected: coord,
                    found,
                }
            });
        }
        let count = elements.len();
        if let Err(source) = slot.load(coord, elements) {
            self.tracker.cool_down(coord, self.tick);
            return Err(ApplyError::Mesh { coord, source });
        }
        debug!(%coord, elements = count, "loaded cell");
        Ok(())
    }

    /// Apply an incremental update for `coord`.
    pub fn on_delta(
        &mut self,
        coord: CellCoord,
        removed_positions: &[u32],
        added: &[Element],
    ) -> Result<(), ApplyError> {
        let slot = self
            .store
            .get_mut(coord)
            .ok_or(ApplyError::OutOfWindow(coord))?;
        match slot.coord() {
            None => return Err(ApplyError::NotLoaded(coord)),
            Some(found) if found != coord => {
                return Err(ApplyError::CoordMismatch {
                    expected: coord,
                    found,
                })
            }
            Some(_) => {}
        }
        slot.mesh_mut()
            .apply_delta(removed_positions, added)
            .map_err(|source| ApplyError::Mesh { coord, source })?;
        debug!(
            %coord,
            removed = removed_positions.len(),
            added = added.len(),
            "updated cell"
        );
        Ok(())
    }

    /// Record that the authority could not provide `coord`.
    pub fn on_unavailable(&mut self, coord: CellCoord) -> bool {
        self.tracker.failed(coord, self.tick)
    }
}
