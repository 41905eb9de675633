//! Outstanding cell request bookkeeping.

use hashbrown::HashMap;
use lux_core::CellCoord;
use tracing::{debug, trace};

use crate::store::CellStore;
use crate::window::Window;

/// Lifecycle of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestState {
    /// Wanted but not yet handed to the network.
    Queued,
    /// Sent; awaiting a response.
    Sent,
}

/// Tracks which cells have been requested from the authority.
///
/// A coordinate is tracked at most once at a time, so at most one request is
/// ever outstanding per cell.
#[derive(Debug, Default)]
pub struct RequestTracker {
    requests: HashMap<CellCoord, RequestState>,
    /// Queued coordinates in the order they were wanted.
    queue: Vec<CellCoord>,
    /// Tick at which a cell the authority could not provide may be wanted again.
    retry_at: HashMap<CellCoord, u64>,
    failure_retry_ticks: u64,
    /// Center the queue is currently sorted for (farthest first).
    sorted_for: Option<CellCoord>,
}

impl RequestTracker {
    /// Create a tracker that waits `failure_retry_ticks` after a failure
    /// before a cell may be wanted again.
    pub fn new(failure_retry_ticks: u64) -> Self {
        Self {
            failure_retry_ticks,
            ..Self::default()
        }
    }

    /// Queue a request for `coord`.
    ///
    /// No-op (returns false) when the cell is out of the store's window,
    /// already loaded, already tracked, or cooling down after a failure.
    pub fn want(&mut self, coord: CellCoord, store: &CellStore, now: u64) -> bool {
        if !store.window().contains(coord) || store.is_loaded(coord) {
            return false;
        }
        if self.requests.contains_key(&coord) {
            return false;
        }
        if self.is_cooling_down(coord, now) {
            return false;
        }
        self.retry_at.remove(&coord);
        self.enqueue(coord);
        trace!(%coord, "queued cell request");
        true
    }

    fn enqueue(&mut self, coord: CellCoord) {
        self.requests.insert(coord, RequestState::Queued);
        self.queue.push(coord);
        self.sorted_for = None;
    }

    /// Take up to `max` queued requests, closest to `center` first, and mark
    /// them as sent.
    pub fn take_batch(&mut self, center: CellCoord, max: usize) -> Vec<CellCoord> {
        if self.queue.is_empty() || max == 0 {
            return Vec::new();
        }
        if self.sorted_for != Some(center) {
            self.queue
                .sort_by_key(|coord| std::cmp::Reverse(coord.distance_squared(center)));
            self.sorted_for = Some(center);
        }
        let split = self.queue.len().saturating_sub(max);
        let mut batch = self.queue.split_off(split);
        batch.reverse();
        for coord in &batch {
            self.requests.insert(*coord, RequestState::Sent);
        }
        batch
    }

    /// Put sent requests back in the queue because they never reached the
    /// authority. Coordinates that are no longer pending are skipped.
    ///
    /// Returns the number of requests queued again.
    pub fn requeue(&mut self, coords: &[CellCoord]) -> usize {
        let mut queued = 0;
        for &coord in coords {
            if self.is_pending(coord) {
                self.enqueue(coord);
                queued += 1;
            }
        }
        if queued > 0 {
            debug!(queued, "requeued unsent cell requests");
        }
        queued
    }

    /// Stop tracking `coord` because a response arrived.
    ///
    /// Call before writing the response into the store. Returns false for a
    /// duplicate or unsolicited response.
    pub fn fulfilled(&mut self, coord: CellCoord) -> bool {
        match self.requests.remove(&coord) {
            Some(RequestState::Sent) => true,
            Some(RequestState::Queued) => {
                self.queue.retain(|&queued| queued != coord);
                true
            }
            None => {
                debug!(%coord, "response for a cell with no outstanding request");
                false
            }
        }
    }

    /// Stop tracking `coord` because the authority could not provide it; it
    /// may be wanted again after the retry delay.
    pub fn failed(&mut self, coord: CellCoord, now: u64) -> bool {
        let tracked = self.fulfilled(coord);
        self.cool_down(coord, now);
        tracked
    }

    /// Block `coord` from being wanted until the retry delay has passed.
    pub fn cool_down(&mut self, coord: CellCoord, now: u64) {
        self.retry_at
            .insert(coord, now.saturating_add(self.failure_retry_ticks));
    }

    /// Returns true if `coord` is waiting out a retry delay at tick `now`.
    pub fn is_cooling_down(&self, coord: CellCoord, now: u64) -> bool {
        self.retry_at.get(&coord).is_some_and(|&at| now < at)
    }

    /// Remove and return every coordinate whose retry delay has passed at `now`.
    pub fn take_due_retries(&mut self, now: u64) -> Vec<CellCoord> {
        let mut due = Vec::new();
        self.retry_at.retain(|coord, at| {
            if now < *at {
                return true;
            }
            due.push(*coord);
            false
        });
        due
    }

    /// Forget every request whose coordinate is outside `window`.
    ///
    /// Returns the number of requests dropped.
    pub fn cancel_out_of_window(&mut self, window: &Window) -> usize {
        let before = self.requests.len();
        self.requests.retain(|coord, _| window.contains(*coord));
        self.queue.retain(|coord| window.contains(*coord));
        self.retry_at.retain(|coord, _| window.contains(*coord));
        let cancelled = before - self.requests.len();
        if cancelled > 0 {
            debug!(cancelled, "cancelled requests that left the window");
        }
        cancelled
    }

    /// Returns true if a request for `coord` has been sent and not answered.
    pub fn is_pending(&self, coord: CellCoord) -> bool {
        self.requests.get(&coord) == Some(&RequestState::Sent)
    }

    /// Returns true if `coord` is queued or pending.
    pub fn is_tracked(&self, coord: CellCoord) -> bool {
        self.requests.contains_key(&coord)
    }

    /// Number of sent, unanswered requests.
    pub fn pending_count(&self) -> usize {
        self.requests.len() - self.queue.len()
    }

    /// Number of requests waiting to be sent.
    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Iterate coordinates with a sent, unanswered request.
    pub fn pending(&self) -> impl Iterator<Item = CellCoord> + '_ {
        self.requests
            .iter()
            .filter(|(_, state)| **state == RequestState::Sent)
            .map(|(coord, _)| *coord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(radius: u32) -> CellStore {
        CellStore::new(Window::new(CellCoord::ZERO, radius))
    }

    #[test]
    fn want_is_deduplicated() {
        let store = store(1);
        let mut tracker = RequestTracker::new(10);
        let coord = CellCoord::new(1, 0, 0);

        assert!(tracker.want(coord, &store, 0));
        assert!(!tracker.want(coord, &store, 0));
        assert_eq!(tracker.take_batch(CellCoord::ZERO, 16), vec![coord]);
        assert!(!tracker.want(coord, &store, 0));
        assert!(tracker.take_batch(CellCoord::ZERO, 16).is_empty());
        assert_eq!(tracker.pending_count(), 1);
        assert!(tracker.is_pending(coord));
    }

    #[test]
    fn want_ignores_out_of_window() {
        let store = store(1);
        let mut tracker = RequestTracker::new(10);
        assert!(!tracker.want(CellCoord::new(2, 0, 0), &store, 0));
        assert_eq!(tracker.queued_count(), 0);
    }

    #[test]
    fn batch_is_closest_first_and_capped() {
        let store = store(2);
        let mut tracker = RequestTracker::new(10);
        let far = CellCoord::new(2, 2, 2);
        let mid = CellCoord::new(1, 1, 0);
        let near = CellCoord::new(0, 0, 1);
        for coord in [far, near, mid] {
            tracker.want(coord, &store, 0);
        }

        assert_eq!(tracker.take_batch(CellCoord::ZERO, 2), vec![near, mid]);
        assert_eq!(tracker.queued_count(), 1);
        assert_eq!(tracker.pending_count(), 2);
        assert_eq!(tracker.take_batch(CellCoord::ZERO, 2), vec![far]);
        assert_eq!(tracker.pending_count(), 3);
    }

    #[test]
    fn fulfilled_twice_is_noop() {
        let store = store(1);
        let mut tracker = RequestTracker::new(10);
        let coord = CellCoord::ZERO;
        tracker.want(coord, &store, 0);
        tracker.take_batch(coord, 1);

        assert!(tracker.fulfilled(coord));
        assert!(!tracker.fulfilled(coord));
        assert_eq!(tracker.pending_count(), 0);
        assert!(tracker.want(coord, &store, 0));
    }

    #[test]
    fn fulfilled_while_queued_removes_from_queue() {
        let store = store(1);
        let mut tracker = RequestTracker::new(10);
        tracker.want(CellCoord::ZERO, &store, 0);
        assert!(tracker.fulfilled(CellCoord::ZERO));
        assert_eq!(tracker.queued_count(), 0);
        assert!(tracker.take_batch(CellCoord::ZERO, 8).is_empty());
    }

    #[test]
    fn failure_delays_retry() {
        let store = store(1);
        let mut tracker = RequestTracker::new(5);
        let coord = CellCoord::new(0, 1, 0);
        tracker.want(coord, &store, 0);
        tracker.take_batch(CellCoord::ZERO, 8);

        assert!(tracker.failed(coord, 3));
        assert!(!tracker.want(coord, &store, 7));
        assert!(tracker.want(coord, &store, 8));
    }

    #[test]
    fn due_retries_are_handed_out_once() {
        let store = store(1);
        let mut tracker = RequestTracker::new(5);
        let coord = CellCoord::new(1, 1, 1);
        tracker.failed(coord, 0);

        assert!(tracker.is_cooling_down(coord, 4));
        assert!(tracker.take_due_retries(4).is_empty());
        assert_eq!(tracker.take_due_retries(5), vec![coord]);
        assert!(tracker.take_due_retries(6).is_empty());
        assert!(!tracker.is_cooling_down(coord, 5));
        assert!(tracker.want(coord, &store, 5));
    }

    #[test]
    fn requeue_returns_sent_requests_to_the_queue() {
        let store = store(1);
        let mut tracker = RequestTracker::new(5);
        let near = CellCoord::ZERO;
        let far = CellCoord::new(1, 1, 1);
        tracker.want(far, &store, 0);
        tracker.want(near, &store, 0);
        let batch = tracker.take_batch(CellCoord::ZERO, 8);
        assert_eq!(batch, vec![near, far]);

        assert_eq!(tracker.requeue(&batch), 2);
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.queued_count(), 2);
        assert!(!tracker.want(near, &store, 0));

        // Only pending requests go back.
        assert_eq!(tracker.requeue(&batch), 0);
        assert_eq!(tracker.take_batch(CellCoord::ZERO, 8), vec![near, far]);
    }

    #[test]
    fn batches_follow_a_moved_center() {
        let store = store(2);
        let mut tracker = RequestTracker::new(5);
        let a = CellCoord::new(-2, 0, 0);
        let b = CellCoord::new(2, 0, 0);
        tracker.want(a, &store, 0);
        tracker.want(b, &store, 0);

        assert_eq!(tracker.take_batch(CellCoord::new(-1, 0, 0), 1), vec![a]);
        tracker.want(CellCoord::new(0, 2, 0), &store, 0);
        assert_eq!(tracker.take_batch(CellCoord::new(2, 1, 0), 1), vec![b]);
    }

    #[test]
    fn cancel_purges_everything_outside() {
        let store = store(2);
        let mut tracker = RequestTracker::new(5);
        for coord in store.window().coords() {
            tracker.want(coord, &store, 0);
        }
        tracker.take_batch(CellCoord::ZERO, 50);
        assert_eq!(tracker.pending_count(), 50);
        assert_eq!(tracker.queued_count(), 125 - 50);

        let moved = Window::new(CellCoord::new(0, 0, 4), 2);
        let cancelled = tracker.cancel_out_of_window(&moved);

        // Only the z = 2 plane overlaps.
        assert_eq!(cancelled, 100);
        assert!(tracker.pending().all(|c| moved.contains(c)));
        assert_eq!(tracker.pending_count() + tracker.queued_count(), 25);
    }
}
