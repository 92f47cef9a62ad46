//! Piecewise-linear lookup tables with a clamped, bounded binary search.
//!
//! Tables are immutable after construction and `Sync`; share them behind an
//! `Arc` without locking. The only interior state is a one-shot flag used to
//! report a failed search once instead of on every call.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::util::fequals;

/// Iteration cap of the bracket search.
pub const MAX_SEARCH_DEPTH: u32 = 20;
/// Longest table the capped search is guaranteed to resolve.
pub const MAX_TABLE_LEN: usize = 1 << MAX_SEARCH_DEPTH;
/// Returned by [`LookupTable::lookup`] when no bracket can be found
/// (only reachable with an unordered input such as NaN).
pub const LOOKUP_SENTINEL: f32 = 0.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("table needs at least 2 points, got {0}")]
    TooShort(usize),
    #[error("table has more than {MAX_TABLE_LEN} points ({0})")]
    TooLong(usize),
    #[error("x has {x} points but y has {y}")]
    LengthMismatch { x: usize, y: usize },
    #[error("non-finite value at index {0}")]
    NonFinite(usize),
    #[error("x decreases at index {0}")]
    NotMonotonic(usize),
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum LookupError {
    #[error("no bracket found for input {x}")]
    SearchFailed { x: f32 },
}

#[derive(Debug)]
pub struct LookupTable {
    name: String,
    x: Box<[f32]>,
    y: Box<[f32]>,
    search_fault: AtomicBool,
}

impl LookupTable {
    /// Build a table. `x` must be non-decreasing; a repeated `x` forms a
    /// vertical step that resolves to the later `y`.
    pub fn new(
        name: impl Into<String>,
        x: impl Into<Box<[f32]>>,
        y: impl Into<Box<[f32]>>,
    ) -> Result<Self, TableError> {
        let (x, y) = (x.into(), y.into());
        if x.len() != y.len() {
            return Err(TableError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        if x.len() < 2 {
            return Err(TableError::TooShort(x.len()));
        }
        if x.len() > MAX_TABLE_LEN {
            return Err(TableError::TooLong(x.len()));
        }
        if let Some(i) = x
            .iter()
            .zip(y.iter())
            .position(|(a, b)| !a.is_finite() || !b.is_finite())
        {
            return Err(TableError::NonFinite(i));
        }
        if let Some(i) = x.windows(2).position(|w| w[1] < w[0]) {
            return Err(TableError::NotMonotonic(i + 1));
        }
        Ok(Self {
            name: name.into(),
            x,
            y,
            search_fault: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn domain(&self) -> (f32, f32) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Interpolated value at `x`, clamped to the end points outside the
    /// domain. Returns [`LOOKUP_SENTINEL`] if the search fails and reports
    /// the first failure through `tracing`.
    pub fn lookup(&self, x: f32) -> f32 {
        match self.try_lookup(x) {
            Ok(y) => y,
            Err(e) => {
                if !self.search_fault.swap(true, Ordering::Relaxed) {
                    tracing::error!(table = %self.name, error = %e, "table search failed, returning sentinel");
                }
                LOOKUP_SENTINEL
            }
        }
    }

    /// Like [`lookup`](Self::lookup) but surfaces a failed search as an error.
    pub fn try_lookup(&self, x: f32) -> Result<f32, LookupError> {
        let last = self.x.len() - 1;
        if x < self.x[0] {
            return Ok(self.y[0]);
        }
        if x > self.x[last] {
            return Ok(self.y[last]);
        }
        let i = self.bracket(x).ok_or(LookupError::SearchFailed { x })?;
        // On a knot, take the last of any run of equal x.
        let hits = self.x[i + 1..].partition_point(|v| *v <= x);
        if hits > 0 {
            return Ok(self.y[i + hits]);
        }
        Ok(interpolate(
            x,
            self.x[i],
            self.x[i + 1],
            self.y[i],
            self.y[i + 1],
        ))
    }

    /// True once any lookup on this table has hit a failed search.
    pub fn has_search_fault(&self) -> bool {
        self.search_fault.load(Ordering::Relaxed)
    }

    /// Index `i` with `x[i] <= x <= x[i + 1]`, or None.
    ///
    /// Searches bracket indices `[0, len - 2]`; every iteration either
    /// returns or shrinks the range by at least one, and the loop is capped
    /// at [`MAX_SEARCH_DEPTH`]. Indexing stays within `mid + 1 <= len - 1`.
    pub fn bracket(&self, x: f32) -> Option<usize> {
        let mut low = 0usize;
        let mut high = self.x.len() - 2;
        for _ in 0..MAX_SEARCH_DEPTH {
            if low > high {
                return None;
            }
            let mid = low + (high - low) / 2;
            if x < self.x[mid] {
                high = mid.checked_sub(1)?;
            } else if x > self.x[mid + 1] {
                low = mid + 1;
            } else if x >= self.x[mid] && x <= self.x[mid + 1] {
                return Some(mid);
            } else {
                // Unordered comparison (NaN)
                return None;
            }
        }
        None
    }
}

/// Free-function form of [`LookupTable::lookup`].
#[inline]
pub fn lookup(x: f32, table: &LookupTable) -> f32 {
    table.lookup(x)
}

/// Linear interpolation between `(x1, y1)` and `(x2, y2)`; a vertical
/// segment returns `y2`.
#[inline]
fn interpolate(x: f32, x1: f32, x2: f32, y1: f32, y2: f32) -> f32 {
    if fequals(x1, x2, 0.0) {
        return y2;
    }
    y1 + (x - x1) * ((y2 - y1) / (x2 - x1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn line() -> LookupTable {
        LookupTable::new("line", vec![0.0, 10.0], vec![0.0, 100.0]).unwrap()
    }

    #[test]
    fn interpolates_midpoint() {
        assert_eq!(lookup(5.0, &line()), 50.0);
    }

    #[test]
    fn clamps_outside_domain() {
        let t = line();
        assert_eq!(t.lookup(-3.0), 0.0);
        assert_eq!(t.lookup(f32::NEG_INFINITY), 0.0);
        assert_eq!(t.lookup(11.0), 100.0);
        assert_eq!(t.lookup(f32::INFINITY), 100.0);
    }

    #[test]
    fn hits_end_points_exactly() {
        let t = line();
        assert_eq!(t.lookup(0.0), 0.0);
        assert_eq!(t.lookup(10.0), 100.0);
    }

    #[test]
    fn repeated_knot_returns_last_y_wherever_the_search_lands() {
        let t = LookupTable::new(
            "steps",
            vec![0.0, 1.0, 1.0, 1.0, 2.0, 3.0, 3.0],
            vec![0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0],
        )
        .unwrap();
        assert_eq!(t.lookup(1.0), 30.0);
        assert_eq!(t.lookup(3.0), 60.0);
        assert_eq!(t.lookup(0.5), 5.0);
        assert_eq!(t.lookup(1.5), 35.0);
        assert_eq!(t.lookup(2.0), 40.0);
    }

    #[test]
    fn degenerate_bracket_returns_later_y() {
        let t = LookupTable::new("step", vec![1.0, 1.0], vec![3.0, 7.0]).unwrap();
        assert_eq!(t.lookup(1.0), 7.0);

        let t = LookupTable::new("plateau", vec![0.0, 5.0, 5.0, 10.0], vec![0.0, 1.0, 2.0, 3.0])
            .unwrap();
        assert_eq!(t.lookup(5.0), 2.0);
        assert!((t.lookup(7.5) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn nan_returns_sentinel_and_reports_once() {
        let t = line();
        assert!(!t.has_search_fault());
        assert!(matches!(
            t.try_lookup(f32::NAN),
            Err(LookupError::SearchFailed { .. })
        ));
        // try_lookup does not latch the report flag
        assert!(!t.has_search_fault());
        assert_eq!(t.lookup(f32::NAN), LOOKUP_SENTINEL);
        assert!(t.has_search_fault());
        assert_eq!(t.lookup(f32::NAN), LOOKUP_SENTINEL);
        // valid lookups keep working after a fault
        assert_eq!(t.lookup(5.0), 50.0);
    }

    #[test]
    fn rejects_malformed_tables() {
        assert_eq!(
            LookupTable::new("a", vec![0.0], vec![0.0]).unwrap_err(),
            TableError::TooShort(1)
        );
        assert_eq!(
            LookupTable::new("a", vec![0.0, 1.0], vec![0.0]).unwrap_err(),
            TableError::LengthMismatch { x: 2, y: 1 }
        );
        assert_eq!(
            LookupTable::new("a", vec![0.0, 2.0, 1.0], vec![0.0, 1.0, 2.0]).unwrap_err(),
            TableError::NotMonotonic(2)
        );
        assert_eq!(
            LookupTable::new("a", vec![0.0, f32::NAN], vec![0.0, 1.0]).unwrap_err(),
            TableError::NonFinite(1)
        );
    }

    #[test]
    fn bracket_covers_every_segment() {
        let xs: Vec<f32> = (0..101).map(|i| i as f32 * 0.5).collect();
        let ys: Vec<f32> = xs.iter().map(|x| x * 2.0).collect();
        let t = LookupTable::new("ramp", xs.clone(), ys).unwrap();
        for i in 0..100 {
            let mid = (xs[i] + xs[i + 1]) / 2.0;
            assert_eq!(t.bracket(mid), Some(i));
        }
        assert_eq!(t.bracket(-1.0), None);
    }

    proptest! {
        #[test]
        fn output_stays_within_range_of_monotonic_table(
            steps in proptest::collection::vec(0.001f32..1.0, 1..64),
            x in -10.0f32..80.0,
        ) {
            let mut xs = vec![0.0f32];
            for s in &steps {
                let next = xs[xs.len() - 1] + s;
                xs.push(next);
            }
            let ys: Vec<f32> = xs.iter().map(|v| 1.0 - v / 100.0).collect();
            let (lo, hi) = (ys[ys.len() - 1], ys[0]);
            let t = LookupTable::new("p", xs, ys).unwrap();
            let y = t.try_lookup(x).unwrap();
            prop_assert!(y >= lo - 1e-4 && y <= hi + 1e-4, "{} outside [{}, {}]", y, lo, hi);
        }
    }
}
