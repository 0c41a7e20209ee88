//! Axis-aligned boxes over the memory space.

use std::fmt;

use super::{Axis, Memory};

/// An axis-aligned region of memory space, bounds inclusive on every axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryRange {
    lower: Memory,
    upper: Memory,
}

impl MemoryRange {
    pub fn new(lower: Memory, upper: Memory) -> Self {
        Self { lower, upper }
    }

    /// The region covering every representable memory.
    pub fn full() -> Self {
        Self::new(Memory::min_value(), Memory::max_value())
    }

    pub fn lower(&self) -> &Memory {
        &self.lower
    }

    pub fn upper(&self) -> &Memory {
        &self.upper
    }

    /// Per-axis `lower <= value <= upper` on all four axes.
    pub fn contains(&self, point: &Memory) -> bool {
        Axis::ALL.iter().all(|&axis| {
            let value = point.coordinate(axis);
            self.lower.coordinate(axis) <= value && value <= self.upper.coordinate(axis)
        })
    }

    /// True when the closed intervals overlap on all four axes.
    pub fn intersects(&self, other: &MemoryRange) -> bool {
        Axis::ALL.iter().all(|&axis| {
            self.lower.coordinate(axis) <= other.upper.coordinate(axis)
                && other.lower.coordinate(axis) <= self.upper.coordinate(axis)
        })
    }
}

impl Default for MemoryRange {
    fn default() -> Self {
        Self::full()
    }
}

impl fmt::Display for MemoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} => {})", self.lower, self.upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(low: f64, high: f64) -> MemoryRange {
        MemoryRange::new(
            Memory::from_coordinates(low, low, low, low),
            Memory::from_coordinates(high, high, high, high),
        )
    }

    #[test]
    fn test_full_range_contains_extremes() {
        let full = MemoryRange::full();
        assert!(full.contains(&Memory::min_value()));
        assert!(full.contains(&Memory::max_value()));
        assert!(full.contains(&Memory::from_coordinates(3.5, 1e12, 1.0, 0.25)));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let range = cube(1.0, 2.0);
        assert!(range.contains(&Memory::from_coordinates(1.0, 2.0, 1.0, 2.0)));
        assert!(!range.contains(&Memory::from_coordinates(1.0, 2.0, 1.0, 2.000_001)));
    }

    #[test]
    fn test_containment_needs_every_axis() {
        let range = cube(0.0, 10.0);
        assert!(!range.contains(&Memory::from_coordinates(5.0, 5.0, 11.0, 5.0)));
    }

    #[test]
    fn test_intersection() {
        assert!(cube(0.0, 2.0).intersects(&cube(1.0, 3.0)));
        assert!(cube(0.0, 2.0).intersects(&cube(2.0, 3.0)));
        assert!(!cube(0.0, 2.0).intersects(&cube(2.5, 3.0)));
        assert!(MemoryRange::full().intersects(&cube(7.0, 8.0)));

        let disjoint_on_one_axis = MemoryRange::new(
            Memory::from_coordinates(0.0, 0.0, 5.0, 0.0),
            Memory::from_coordinates(1.0, 1.0, 6.0, 1.0),
        );
        assert!(!cube(0.0, 1.0).intersects(&disjoint_on_one_axis));
    }
}
