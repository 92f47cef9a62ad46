//! Voltage-ordered view of a module's bricks.
//!
//! The index-addressable voltage array is never reordered; the ranking is a
//! separate fixed-capacity list of `(index, voltage)` pairs in ascending
//! voltage order. Voltages equal within [`RANK_TOLERANCE_V`] keep their input
//! order.

use bms_config::MAX_BRICKS_PER_MODULE;

use crate::util::{RANK_TOLERANCE_V, fequals};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Brick {
    pub index: usize,
    pub voltage_v: f32,
}

impl Brick {
    pub const fn new(index: usize, voltage_v: f32) -> Self {
        Self { index, voltage_v }
    }
}

/// Position after every element `<= v` (tolerance-aware upper bound).
///
/// Inserting there keeps equal voltages in arrival order.
pub fn insertion_point(sorted: &[Brick], v: f32) -> usize {
    let (mut low, mut high) = (0usize, sorted.len());
    while low < high {
        let mid = low + (high - low) / 2;
        let m = sorted[mid].voltage_v;
        if m < v || fequals(m, v, RANK_TOLERANCE_V) {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}

#[derive(Debug, Clone, Copy)]
pub struct BrickRanking {
    slots: [Brick; MAX_BRICKS_PER_MODULE],
    len: usize,
}

impl Default for BrickRanking {
    fn default() -> Self {
        Self {
            slots: [Brick::default(); MAX_BRICKS_PER_MODULE],
            len: 0,
        }
    }
}

impl BrickRanking {
    /// Insert one brick. Returns false when the ranking is full or the
    /// voltage is not finite.
    pub fn insert(&mut self, brick: Brick) -> bool {
        if self.len == MAX_BRICKS_PER_MODULE || !brick.voltage_v.is_finite() {
            return false;
        }
        let pos = insertion_point(&self.slots[..self.len], brick.voltage_v);
        self.len += 1;
        self.slots[pos..self.len].rotate_right(1);
        self.slots[pos] = brick;
        true
    }

    /// Ascending order, lowest voltage first.
    pub fn as_slice(&self) -> &[Brick] {
        &self.slots[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn lowest(&self) -> Option<Brick> {
        self.as_slice().first().copied()
    }

    pub fn highest(&self) -> Option<Brick> {
        self.as_slice().last().copied()
    }

    /// Highest voltage first.
    pub fn descending(&self) -> impl Iterator<Item = &Brick> {
        self.as_slice().iter().rev()
    }
}

/// Rank `(index, voltage)` pairs. Non-finite voltages are left out; input
/// beyond [`MAX_BRICKS_PER_MODULE`] is ignored.
pub fn rank_bricks(bricks: impl IntoIterator<Item = Brick>) -> BrickRanking {
    let mut ranking = BrickRanking::default();
    for brick in bricks {
        if ranking.len() == MAX_BRICKS_PER_MODULE {
            break;
        }
        ranking.insert(brick);
    }
    ranking
}

/// Rank an index-addressed voltage slice.
pub fn rank_voltages(voltages: &[f32]) -> BrickRanking {
    rank_bricks(
        voltages
            .iter()
            .enumerate()
            .map(|(index, v)| Brick::new(index, *v)),
    )
}
