//! Time and elevation ranges used for segment pruning and pass filtering.

use chrono::{DateTime, Utc};
use cps_common::{max_time, min_time};
use serde::{Deserialize, Serialize};

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The whole representable time line.
    pub fn all() -> Self {
        Self::new(min_time(), max_time())
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time < self.end
    }

    /// Whether the two half-open intervals share any instant.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Closed elevation interval `[min, max]` in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElevationRange {
    pub min: f32,
    pub max: f32,
}

impl ElevationRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// A degenerate range holding a single height.
    pub fn point(height: f32) -> Self {
        Self::new(height, height)
    }

    pub fn contains(&self, height: f32) -> bool {
        self.min <= height && height <= self.max
    }

    pub fn overlaps(&self, other: &ElevationRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    /// Widen to include `height`.
    pub fn include(&mut self, height: f32) {
        self.min = self.min.min(height);
        self.max = self.max.max(height);
    }

    /// Smallest range covering both inputs; `None` parts are ignored.
    pub fn union(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(mut a), Some(b)) => {
                a.include(b.min);
                a.include(b.max);
                Some(a)
            }
            (a, None) => a,
            (None, b) => b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn time_ranges_are_half_open() {
        let a = TimeRange::new(day(1), day(3));
        let b = TimeRange::new(day(3), day(5));
        assert!(!a.overlaps(&b));
        assert!(a.contains(day(1)));
        assert!(!a.contains(day(3)));
        assert!(a.overlaps(&TimeRange::new(day(2), day(4))));
    }

    #[test]
    fn elevation_overlap_is_inclusive() {
        let a = ElevationRange::new(10.0, 20.0);
        assert!(a.overlaps(&ElevationRange::new(20.0, 30.0)));
        assert!(!a.overlaps(&ElevationRange::new(20.5, 30.0)));
    }

    #[test]
    fn union_ignores_missing_sides() {
        let a = Some(ElevationRange::new(1.0, 2.0));
        assert_eq!(ElevationRange::union(a, None), a);
        assert_eq!(
            ElevationRange::union(a, Some(ElevationRange::point(5.0))),
            Some(ElevationRange::new(1.0, 5.0))
        );
    }
}
