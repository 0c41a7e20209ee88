//! A single control rule.

use std::fmt;
use std::time::Duration;

use crate::memory::MemoryRange;

/// Upper clamp applied to every computed congestion window (packets).
pub const MAX_WINDOW: u32 = 1_000_000;

/// An immutable congestion-control directive bound to a memory region.
///
/// The window law is `prev * window_multiple + window_increment`, clamped to
/// `[0, MAX_WINDOW]`; `intersend` is the minimum spacing between sends in
/// seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Whisker {
    generation: u32,
    window_increment: i32,
    window_multiple: f64,
    intersend: f64,
    domain: MemoryRange,
}

impl Whisker {
    pub fn new(
        generation: u32,
        window_increment: i32,
        window_multiple: f64,
        intersend: f64,
        domain: MemoryRange,
    ) -> Self {
        Self {
            generation,
            window_increment,
            window_multiple,
            intersend,
            domain,
        }
    }

    /// The generation-0 rule covering the whole memory space: keep the
    /// window as is and send without spacing.
    pub fn default_root() -> Self {
        Self::new(0, 0, 1.0, 0.0, MemoryRange::full())
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn window_increment(&self) -> i32 {
        self.window_increment
    }

    pub fn window_multiple(&self) -> f64 {
        self.window_multiple
    }

    /// Minimum spacing between sends, in seconds.
    pub fn intersend(&self) -> f64 {
        self.intersend
    }

    /// `intersend` as a duration. Zero, negative and NaN values mean no
    /// spacing; values beyond `Duration::MAX` (including infinity) saturate.
    pub fn intersend_duration(&self) -> Duration {
        if self.intersend.is_nan() || self.intersend <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(self.intersend).unwrap_or(Duration::MAX)
    }

    pub fn domain(&self) -> &MemoryRange {
        &self.domain
    }

    /// Applies the window law to `prev_window`.
    pub fn window(&self, prev_window: u32) -> u32 {
        let next = f64::from(prev_window) * self.window_multiple + f64::from(self.window_increment);
        if next.is_nan() {
            return 0;
        }
        next.clamp(0.0, f64::from(MAX_WINDOW)) as u32
    }
}

impl fmt::Display for Whisker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "generation={}, window_increment={}, window_multiple={:.6}, intersend={:.6}, domain={}",
            self.generation, self.window_increment, self.window_multiple, self.intersend, self.domain
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(increment: i32, multiple: f64) -> Whisker {
        Whisker::new(1, increment, multiple, 0.0, MemoryRange::full())
    }

    #[test]
    fn test_additive_increase() {
        assert_eq!(rule(1, 1.0).window(0), 1);
        assert_eq!(rule(1, 1.0).window(41), 42);
    }

    #[test]
    fn test_multiplicative_decrease() {
        assert_eq!(rule(0, 0.5).window(100), 50);
        assert_eq!(rule(-3, 0.5).window(10), 2);
    }

    #[test]
    fn test_window_never_negative() {
        assert_eq!(rule(-10, 1.0).window(3), 0);
        assert_eq!(rule(-1, 0.0).window(u32::MAX), 0);
    }

    #[test]
    fn test_window_clamped_to_max() {
        assert_eq!(rule(0, 2.0).window(900_000), MAX_WINDOW);
        assert_eq!(rule(i32::MAX, 1.0).window(0), MAX_WINDOW);
        assert_eq!(rule(0, f64::INFINITY).window(1), MAX_WINDOW);
    }

    #[test]
    fn test_window_law_is_deterministic_and_bounded() {
        let rules = [
            rule(0, 1.0),
            rule(1, 1.0),
            rule(5, 0.7),
            rule(-2, 1.3),
            rule(100, 0.0),
            rule(0, f64::NAN),
        ];
        for whisker in rules {
            for prev in [0u32, 1, 7, 999, 65_536, MAX_WINDOW, u32::MAX] {
                let first = whisker.window(prev);
                assert_eq!(first, whisker.window(prev));
                assert!(first <= MAX_WINDOW);
            }
        }
    }

    #[test]
    fn test_zero_window_root() {
        let root = Whisker::default_root();
        assert_eq!(root.window(0), 0);
        assert_eq!(root.intersend_duration(), Duration::ZERO);
    }

    #[test]
    fn test_negative_intersend_means_no_spacing() {
        let whisker = Whisker::new(1, 1, 1.0, -0.5, MemoryRange::full());
        assert_eq!(whisker.intersend_duration(), Duration::ZERO);
        let whisker = Whisker::new(1, 1, 1.0, 0.25, MemoryRange::full());
        assert_eq!(whisker.intersend_duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_oversized_intersend_saturates() {
        for intersend in [1e30, f64::INFINITY] {
            let whisker = Whisker::new(1, 1, 1.0, intersend, MemoryRange::full());
            assert_eq!(whisker.intersend_duration(), Duration::MAX);
        }
        let whisker = Whisker::new(1, 1, 1.0, f64::NAN, MemoryRange::full());
        assert_eq!(whisker.intersend_duration(), Duration::ZERO);
        let whisker = Whisker::new(1, 1, 1.0, f64::NEG_INFINITY, MemoryRange::full());
        assert_eq!(whisker.intersend_duration(), Duration::ZERO);
    }
}
