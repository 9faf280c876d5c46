use std::cmp::Ordering;
use std::fmt;

/// A rational timestamp: `value` ticks of a clock running at `timescale` Hz.
///
/// Capture clocks deliver raw tick counts; the tick value is what goes on the
/// wire as `pts`, while the container rescales it into each track's timescale.
#[derive(Debug, Clone, Copy)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub const fn new(value: i64, timescale: u32) -> Self {
        Self { value, timescale }
    }

    pub const fn zero(timescale: u32) -> Self {
        Self { value: 0, timescale }
    }

    pub fn is_valid(&self) -> bool {
        self.timescale != 0
    }

    /// Converts to `timescale` ticks, rounding to the nearest tick.
    pub fn rescale(&self, timescale: u32) -> i64 {
        if self.timescale == timescale || self.timescale == 0 {
            return self.value;
        }
        let num = self.value as i128 * timescale as i128;
        let den = self.timescale as i128;
        let half = den / 2;
        let rounded = if num >= 0 { (num + half) / den } else { (num - half) / den };
        rounded as i64
    }

    pub fn seconds(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.value as f64 / self.timescale as f64
    }

    /// `self - other`, expressed in `timescale` ticks.
    pub fn delta(&self, other: &MediaTime, timescale: u32) -> i64 {
        self.rescale(timescale) - other.rescale(timescale)
    }

    fn cross(&self, other: &MediaTime) -> (i128, i128) {
        (
            self.value as i128 * other.timescale as i128,
            other.value as i128 * self.timescale as i128,
        )
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = self.cross(other);
        a == b
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = self.cross(other);
        a.cmp(&b)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescale_rounds_to_nearest() {
        let t = MediaTime::new(1, 3);
        assert_eq!(t.rescale(1000), 333);
        assert_eq!(MediaTime::new(2, 3).rescale(1000), 667);
        assert_eq!(MediaTime::new(-2, 3).rescale(1000), -667);
        assert_eq!(MediaTime::new(1024, 44_100).rescale(44_100), 1024);
    }

    #[test]
    fn test_equality_across_timescales() {
        assert_eq!(MediaTime::new(1, 2), MediaTime::new(500, 1000));
        assert!(MediaTime::new(1, 3) < MediaTime::new(334, 1000));
        assert!(MediaTime::new(90_000, 90_000) > MediaTime::new(999, 1000));
    }

    #[test]
    fn test_delta() {
        let a = MediaTime::new(3000, 1000);
        let b = MediaTime::new(90_000, 90_000);
        assert_eq!(a.delta(&b, 1000), 2000);
    }
}
