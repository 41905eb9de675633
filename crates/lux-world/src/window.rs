//! Cubic cell window and its slot index mapping.
//!
//! A window covers every coordinate whose Chebyshev distance to the center is
//! at most the radius. Slots are laid out x-fastest over the window's
//! `side^3` cube, so the slot index is an affine function of
//! `coord - center + radius`.

use lux_core::CellCoord;

/// Cubic window of cells around a center.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Window {
    pub center: CellCoord,
    pub radius: u32,
}

impl Window {
    /// Largest radius a window may have (side 129, ~2.1M slots).
    pub const MAX_RADIUS: u32 = 64;

    /// Create a new window.
    #[inline]
    pub const fn new(center: CellCoord, radius: u32) -> Self {
        Self { center, radius }
    }

    /// Number of cells along each axis.
    #[inline]
    pub const fn side(&self) -> usize {
        2 * self.radius as usize + 1
    }

    /// Total number of slots.
    #[inline]
    pub const fn volume(&self) -> usize {
        let side = self.side();
        side * side * side
    }

    /// Per-axis offset of `coord` from the window's minimum corner, or `None`
    /// when the coordinate lies outside the window.
    ///
    /// Both [`Self::slot_of`] and [`Self::contains`] go through this check.
    #[inline]
    fn local_offset(&self, coord: CellCoord) -> Option<[usize; 3]> {
        let radius = i64::from(self.radius);
        let side = self.side() as i64;
        let axis = |c: i32, center: i32| {
            let offset = i64::from(c) - i64::from(center) + radius;
            (0..side).contains(&offset).then_some(offset as usize)
        };
        Some([
            axis(coord.x, self.center.x)?,
            axis(coord.y, self.center.y)?,
            axis(coord.z, self.center.z)?,
        ])
    }

    /// Slot index of `coord`, or `None` when it is out of the window.
    #[inline]
    pub fn slot_of(&self, coord: CellCoord) -> Option<usize> {
        let side = self.side();
        self.local_offset(coord)
            .map(|[x, y, z]| x + y * side + z * side * side)
    }

    /// Returns true if `coord` is inside the window.
    #[inline]
    pub fn contains(&self, coord: CellCoord) -> bool {
        self.local_offset(coord).is_some()
    }

    /// Coordinate stored at `slot`.
    ///
    /// `None` when the index is past the end, or when the slot lies beyond the
    /// `i32` coordinate range (windows centered near the edge keep those slots
    /// permanently empty).
    #[inline]
    pub fn coord_of(&self, slot: usize) -> Option<CellCoord> {
        if slot >= self.volume() {
            return None;
        }
        let side = self.side();
        let radius = i64::from(self.radius);
        let axis = |center: i32, offset: usize| {
            i32::try_from(i64::from(center) - radius + offset as i64).ok()
        };
        Some(CellCoord::new(
            axis(self.center.x, slot % side)?,
            axis(self.center.y, (slot / side) % side)?,
            axis(self.center.z, slot / (side * side))?,
        ))
    }

    /// Inclusive bounds of the window, clipped to the `i32` coordinate range.
    #[inline]
    pub fn bounds(&self) -> CellBounds {
        let radius = i64::from(self.radius);
        let clip = |v: i64| v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        let lo = |c: i32| clip(i64::from(c) - radius);
        let hi = |c: i32| clip(i64::from(c) + radius);
        CellBounds {
            min: CellCoord::new(lo(self.center.x), lo(self.center.y), lo(self.center.z)),
            max: CellCoord::new(hi(self.center.x), hi(self.center.y), hi(self.center.z)),
        }
    }

    /// Overlap of two windows, or `None` when they share no coordinate.
    pub fn intersection(&self, other: &Self) -> Option<CellBounds> {
        self.bounds().intersection(&other.bounds())
    }

    /// Iterate all representable coordinates in slot order.
    pub fn coords(&self) -> impl Iterator<Item = CellCoord> + '_ {
        (0..self.volume()).filter_map(move |slot| self.coord_of(slot))
    }
}

/// Inclusive axis-aligned box of cell coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellBounds {
    pub min: CellCoord,
    pub max: CellCoord,
}

impl CellBounds {
    /// Overlap of two boxes, or `None` when they are disjoint.
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let min = CellCoord::new(
            self.min.x.max(other.min.x),
            self.min.y.max(other.min.y),
            self.min.z.max(other.min.z),
        );
        let max = CellCoord::new(
            self.max.x.min(other.max.x),
            self.max.y.min(other.max.y),
            self.max.z.min(other.max.z),
        );
        (min.x <= max.x && min.y <= max.y && min.z <= max.z).then_some(Self { min, max })
    }

    /// Number of coordinates in the box.
    pub fn volume(&self) -> usize {
        let extent = |lo: i32, hi: i32| (i64::from(hi) - i64::from(lo) + 1) as usize;
        extent(self.min.x, self.max.x) * extent(self.min.y, self.max.y) * extent(self.min.z, self.max.z)
    }

    /// Returns true if `coord` lies inside the box.
    pub fn contains(&self, coord: CellCoord) -> bool {
        (self.min.x..=self.max.x).contains(&coord.x)
            && (self.min.y..=self.max.y).contains(&coord.y)
            && (self.min.z..=self.max.z).contains(&coord.z)
    }

    /// Iterate the box z-major, x-fastest.
    pub fn iter(&self) -> impl Iterator<Item = CellCoord> {
        let Self { min, max } = *self;
        (min.z..=max.z).flat_map(move |z| {
            (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| CellCoord::new(x, y, z)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_and_volume() {
        let window = Window::new(CellCoord::ZERO, 0);
        assert_eq!(window.side(), 1);
        assert_eq!(window.volume(), 1);

        let window = Window::new(CellCoord::new(5, -3, 9), 2);
        assert_eq!(window.side(), 5);
        assert_eq!(window.volume(), 125);
    }

    #[test]
    fn slot_and_membership_agree() {
        let window = Window::new(CellCoord::new(-2, 7, 1), 2);
        for z in -6..=6 {
            for y in 2..=12 {
                for x in -7..=3 {
                    let coord = CellCoord::new(x, y, z);
                    let in_window = coord.chebyshev_distance(window.center) <= window.radius;
                    assert_eq!(window.contains(coord), in_window, "{coord}");
                    assert_eq!(window.slot_of(coord).is_some(), in_window, "{coord}");
                }
            }
        }
    }

    #[test]
    fn slot_coord_roundtrip_covers_every_slot() {
        let window = Window::new(CellCoord::new(3, -1, 0), 1);
        let mut seen = vec![false; window.volume()];
        for coord in window.coords() {
            let slot = window.slot_of(coord).unwrap();
            assert!(!seen[slot]);
            seen[slot] = true;
            assert_eq!(window.coord_of(slot), Some(coord));
        }
        assert!(seen.iter().all(|&s| s));
        assert_eq!(window.coord_of(window.volume()), None);
    }

    #[test]
    fn extreme_coordinates_do_not_overflow() {
        let window = Window::new(CellCoord::new(i32::MAX - 1, i32::MIN + 1, 0), 1);
        assert!(window.contains(CellCoord::new(i32::MAX, i32::MIN, 0)));
        assert!(!window.contains(CellCoord::new(i32::MIN, i32::MIN, 0)));
        assert!(!window.contains(CellCoord::new(i32::MAX, i32::MAX, 0)));
    }

    #[test]
    fn windows_at_the_i32_edge_are_clipped() {
        let window = Window::new(CellCoord::new(i32::MAX, 0, i32::MIN), 1);
        let bounds = window.bounds();
        assert_eq!(bounds.min, CellCoord::new(i32::MAX - 1, -1, i32::MIN));
        assert_eq!(bounds.max, CellCoord::new(i32::MAX, 1, i32::MIN + 1));
        assert_eq!(bounds.volume(), 12);

        let coords: Vec<_> = window.coords().collect();
        assert_eq!(coords.len(), 12);
        assert_eq!(bounds.iter().count(), 12);
        for coord in coords {
            assert!(window.contains(coord));
            assert_eq!(window.coord_of(window.slot_of(coord).unwrap()), Some(coord));
        }

        let neighbor = Window::new(CellCoord::new(i32::MAX - 2, 0, i32::MIN), 1);
        let overlap = window.intersection(&neighbor).unwrap();
        assert_eq!(overlap.min.x, i32::MAX - 1);
        assert_eq!(overlap.max.x, i32::MAX - 1);
        assert_eq!(overlap.volume(), 6);
    }

    #[test]
    fn intersection_of_shifted_windows() {
        let a = Window::new(CellCoord::ZERO, 1);
        let b = Window::new(CellCoord::new(1, 0, 0), 1);
        let overlap = a.intersection(&b).unwrap();
        assert_eq!(overlap.min, CellCoord::new(0, -1, -1));
        assert_eq!(overlap.max, CellCoord::new(1, 1, 1));
        assert_eq!(overlap.volume(), 18);
        assert_eq!(overlap.iter().count(), 18);

        let far = Window::new(CellCoord::new(3, 0, 0), 1);
        assert!(a.intersection(&far).is_none());
    }

    #[test]
    fn bounds_contains_matches_window() {
        let window = Window::new(CellCoord::new(1, 2, 3), 2);
        let bounds = window.bounds();
        for coord in bounds.iter() {
            assert!(window.contains(coord));
        }
        assert!(!bounds.contains(CellCoord::new(4, 2, 3)));
    }
}
