use crate::config::Dim;
use crate::families::{RationalFamilies, RationalFamily};
use crate::rational::RationalTrajectory;

/// Spatial coordinates; axes beyond the dimension stay at 0.
pub type Point = [f64; 3];

/// Largest digit base (`2^3`).
pub const MAX_BASE: usize = 8;

/// One trajectory passing through one position at one time step.
#[derive(Debug, Clone, Copy)]
pub struct Visit<'a> {
    pub t: usize,
    pub pos: Point,
    pub next_digit: u8,
    pub timing: u64,
    /// Present only when rational families are tracked; the family member
    /// recorded is the rotation of the rational reached at `t`.
    pub rational: Option<&'a RationalTrajectory>,
}

/// Aggregate of every visit to one coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pos: Point,
    dim: Dim,
    count: u64,
    time_sum: f64,
    next_digits: [u64; MAX_BASE],
    rationals: Option<RationalFamilies>,
}

/// Read-only copy of a cell handed out by queries.
#[derive(Debug, Clone, PartialEq)]
pub struct CellSnapshot {
    /// Coordinates, one per used axis.
    pub pos: Vec<f64>,
    pub count: u64,
    /// Average timing metric.
    pub time: f64,
    /// Next-digit histogram, one counter per digit of the base.
    pub next_digits: Vec<u64>,
    pub rationals: Option<Vec<RationalFamily>>,
}

impl Cell {
    pub fn new(dim: Dim, pos: Point, track_rationals: bool) -> Self {
        Self {
            pos,
            dim,
            count: 0,
            time_sum: 0.0,
            next_digits: [0; MAX_BASE],
            rationals: track_rationals.then(RationalFamilies::new),
        }
    }

    pub fn pos(&self) -> Point {
        self.pos
    }

    /// Overwrite the position of an empty cell.
    pub(crate) fn place(&mut self, pos: Point) {
        self.pos = pos;
    }

    pub fn dim(&self) -> Dim {
        self.dim
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn time_sum(&self) -> f64 {
        self.time_sum
    }

    /// Histogram trimmed to the base of the cell's dimension.
    pub fn next_digits(&self) -> &[u64] {
        &self.next_digits[..self.dim.base() as usize]
    }

    pub fn tracks_rationals(&self) -> bool {
        self.rationals.is_some()
    }

    pub fn add(&mut self, timing: u64, next_digit: u8) {
        self.count += 1;
        self.time_sum += timing as f64;
        self.next_digits[next_digit as usize] += 1;
    }

    /// Record a visit, including the contributing rational when tracked.
    pub fn record(&mut self, visit: &Visit<'_>) {
        self.add(visit.timing, visit.next_digit);
        if let (Some(families), Some(r)) = (self.rationals.as_mut(), visit.rational) {
            families.add(r.remainder(visit.t), r.remainders(), &r.path(), visit.timing);
        }
    }

    /// Restore persisted state. The summed timing is `average * count`, rounded
    /// back to the integer total every visit contributes.
    pub fn set(
        &mut self,
        count: u64,
        average_time: f64,
        next_digits: &[u64],
        rationals: Option<&[RationalFamily]>,
    ) {
        self.count = count;
        self.time_sum = (average_time * count as f64).round();
        self.next_digits = [0; MAX_BASE];
        for (slot, &v) in self.next_digits.iter_mut().zip(next_digits) {
            *slot = v;
        }
        if let (Some(families), Some(stored)) = (self.rationals.as_mut(), rationals) {
            *families = RationalFamilies::from_families(stored);
        }
    }

    /// Fold another cell's statistics into this one.
    pub fn merge(&mut self, other: &Cell) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            self.pos = other.pos;
        }
        self.count += other.count;
        self.time_sum += other.time_sum;
        for (a, b) in self.next_digits.iter_mut().zip(other.next_digits.iter()) {
            *a += b;
        }
        if let (Some(mine), Some(theirs)) = (self.rationals.as_mut(), other.rationals.as_ref()) {
            mine.merge(theirs);
        }
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.time_sum = 0.0;
        self.next_digits = [0; MAX_BASE];
        if let Some(families) = self.rationals.as_mut() {
            families.clear();
        }
    }

    pub fn average_time(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.time_sum / self.count as f64
        }
    }

    pub fn snapshot(&self) -> CellSnapshot {
        CellSnapshot {
            pos: self.pos[..self.dim.axes()].to_vec(),
            count: self.count,
            time: self.average_time(),
            next_digits: self.next_digits().to_vec(),
            rationals: self.rationals.as_ref().map(RationalFamilies::families),
        }
    }
}

/// Expand per-axis coordinates into a [`Point`].
pub fn point_from(coords: &[f64]) -> Point {
    let mut p = [0.0; 3];
    for (slot, &c) in p.iter_mut().zip(coords) {
        *slot = c;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_keeps_histogram_in_step_with_count() {
        let mut cell = Cell::new(Dim::Two, [0.5, -0.5, 0.0], false);
        cell.add(2, 0);
        cell.add(4, 3);
        cell.add(3, 3);
        assert_eq!(cell.count(), 3);
        assert_eq!(cell.next_digits(), &[1, 0, 0, 2]);
        assert_eq!(cell.next_digits().iter().sum::<u64>(), cell.count());
        assert_eq!(cell.average_time(), 3.0);
    }

    #[test]
    fn snapshot_trims_to_dimension() {
        let mut cell = Cell::new(Dim::One, [1.5, 0.0, 0.0], false);
        cell.add(1, 1);
        let snap = cell.snapshot();
        assert_eq!(snap.pos, vec![1.5]);
        assert_eq!(snap.next_digits, vec![0, 1]);
        assert_eq!(snap.time, 1.0);
        assert!(snap.rationals.is_none());
    }

    #[test]
    fn set_restores_snapshot() {
        let mut cell = Cell::new(Dim::One, [0.0; 3], false);
        cell.add(1, 0);
        cell.add(2, 1);
        cell.add(2, 1);
        let snap = cell.snapshot();

        let mut restored = Cell::new(Dim::One, [0.0; 3], false);
        restored.set(snap.count, snap.time, &snap.next_digits, None);
        assert_eq!(restored.snapshot(), snap);
    }

    #[test]
    fn set_rebuilds_integral_timing_sum() {
        let mut cell = Cell::new(Dim::One, [0.0; 3], false);
        cell.set(3, 7.0 / 3.0, &[3, 0], None);
        assert_eq!(cell.time_sum(), 7.0);
        cell.add(2, 0);
        assert_eq!(cell.time_sum(), 9.0);
        assert_eq!(cell.average_time(), 2.25);
    }

    #[test]
    fn merge_sums_statistics() {
        let mut a = Cell::new(Dim::One, [0.5, 0.0, 0.0], false);
        a.add(1, 0);
        let mut b = Cell::new(Dim::One, [0.5, 0.0, 0.0], false);
        b.add(3, 1);
        b.add(5, 1);

        a.merge(&b);
        assert_eq!(a.count(), 3);
        assert_eq!(a.time_sum(), 9.0);
        assert_eq!(a.next_digits(), &[1, 2]);
    }

    #[test]
    fn merge_into_empty_adopts_position() {
        let mut a = Cell::new(Dim::One, [9.0, 0.0, 0.0], false);
        let mut b = Cell::new(Dim::One, [-1.0, 0.0, 0.0], false);
        b.add(0, 0);
        a.merge(&b);
        assert_eq!(a.pos(), [-1.0, 0.0, 0.0]);
    }

    #[test]
    fn record_tracks_rationals() {
        let r = RationalTrajectory::new(1, 7, Dim::One).unwrap();
        let mut cell = Cell::new(Dim::One, [0.5, 0.0, 0.0], true);
        cell.record(&Visit {
            t: 1,
            pos: [0.5, 0.0, 0.0],
            next_digit: r.digit(2),
            timing: r.timing(1),
            rational: Some(&r),
        });
        let snap = cell.snapshot();
        let families = snap.rationals.unwrap();
        assert_eq!(families.len(), 1);
        // 1/7 has rotated to 2/7 after one step
        assert_eq!(families[0].members, vec![2]);
        assert_eq!(families[0].digits, "001");
        assert_eq!(snap.next_digits, vec![0, 1]);
    }

    #[test]
    fn clear_resets_everything() {
        let mut cell = Cell::new(Dim::Three, [0.0; 3], true);
        cell.add(7, 7);
        cell.clear();
        assert!(cell.is_empty());
        assert_eq!(cell.time_sum(), 0.0);
        assert!(cell.next_digits().iter().all(|&d| d == 0));
        assert_eq!(cell.snapshot().rationals, Some(Vec::new()));
    }

    #[test]
    fn point_from_pads_missing_axes() {
        assert_eq!(point_from(&[1.0]), [1.0, 0.0, 0.0]);
        assert_eq!(point_from(&[1.0, -2.0]), [1.0, -2.0, 0.0]);
    }
}
