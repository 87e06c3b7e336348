use crate::cell::{point_from, CellSnapshot, Point, Visit};
use crate::config::{Dim, EngineConfig, IndexKind};
use crate::error::GridError;
use crate::grid::{self, CellIndex, GridShape};
use crate::rational::C;

/// Persisted name of the even-parity accumulator.
pub const EVEN_ACCUMULATOR: &str = "accumulates_even";
/// Persisted name of the odd-parity accumulator.
pub const ODD_ACCUMULATOR: &str = "accumulates_odd";

/// Read-only access to aggregated cells.
pub trait CellQuery {
    /// Snapshot of the non-empty cell at `coords` (one value per axis).
    fn get_cell(&self, t: usize, coords: &[f64], accumulate: bool) -> Option<CellSnapshot>;

    /// Snapshots of every non-empty cell at time `t`.
    fn get_cells(&self, t: usize, accumulate: bool) -> Vec<CellSnapshot>;

    /// Last time step.
    fn len(&self) -> usize;
}

/// Horizons of the (even, odd) accumulators for cycle modulus `t_modulus`.
pub fn accumulator_horizons(t_modulus: usize, max: usize) -> (usize, usize) {
    let t_even = t_modulus % 2 == 0;
    let below = max.saturating_sub(1);
    if (9..=15).contains(&t_modulus) {
        let even = if t_even { max } else { below };
        let odd = if t_even { below } else { max };
        (even, odd)
    } else {
        let odd = if t_even { below } else { max + 1 };
        (max, odd)
    }
}

/// Whether the accumulators of [`accumulator_horizons`] hold the last even and
/// odd time steps up to `max`.
pub fn accumulators_reach(t_modulus: usize, max: usize) -> bool {
    let (even, odd) = accumulator_horizons(t_modulus, max);
    let last_even = max - max % 2;
    let last_odd = if max % 2 == 1 { max } else { max.saturating_sub(1) };
    even >= last_even && (max == 0 || odd >= last_odd)
}

/// One grid per time step `0..=max` plus the two parity accumulators.
#[derive(Debug)]
pub struct SpaceSet {
    dim: Dim,
    t_modulus: usize,
    max: usize,
    kind: IndexKind,
    octree_depth: usize,
    track_rationals: bool,
    spaces: Vec<Box<dyn CellIndex>>,
    even: Box<dyn CellIndex>,
    odd: Box<dyn CellIndex>,
}

impl SpaceSet {
    pub fn new(config: &EngineConfig) -> Self {
        let dim = config.dim;
        let track = config.track_rationals;
        let build = |h: usize| grid::build(config.index, GridShape::new(dim, h, track), config.octree_depth);

        let spaces = (0..=config.max).map(build).collect();
        let (even_h, odd_h) = accumulator_horizons(config.t_modulus, config.max);
        log::debug!(
            "space set: dim={dim} max={} index={} accumulators=({even_h}, {odd_h})",
            config.max,
            config.index
        );

        Self {
            dim,
            t_modulus: config.t_modulus,
            max: config.max,
            kind: config.index,
            octree_depth: config.octree_depth,
            track_rationals: track,
            spaces,
            even: build(even_h),
            odd: build(odd_h),
        }
    }

    /// A fresh, empty set with the same shape.
    pub fn empty_like(&self) -> Self {
        Self {
            dim: self.dim,
            t_modulus: self.t_modulus,
            max: self.max,
            kind: self.kind,
            octree_depth: self.octree_depth,
            track_rationals: self.track_rationals,
            spaces: self.spaces.iter().map(|g| g.empty_like()).collect(),
            even: self.even.empty_like(),
            odd: self.odd.empty_like(),
        }
    }

    pub fn dim(&self) -> Dim {
        self.dim
    }

    pub fn t_modulus(&self) -> usize {
        self.t_modulus
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn index_kind(&self) -> IndexKind {
        self.kind
    }

    pub fn octree_depth(&self) -> usize {
        self.octree_depth
    }

    pub fn tracks_rationals(&self) -> bool {
        self.track_rationals
    }

    /// Grid for time step `t`, or the accumulator of `t`'s parity.
    pub fn grid(&self, t: usize, accumulate: bool) -> Option<&dyn CellIndex> {
        if t > self.max {
            return None;
        }
        if accumulate {
            Some(self.accumulator(t))
        } else {
            Some(self.spaces[t].as_ref())
        }
    }

    fn accumulator(&self, t: usize) -> &dyn CellIndex {
        if t % 2 == 0 {
            self.even.as_ref()
        } else {
            self.odd.as_ref()
        }
    }

    /// Every grid with its persisted name: `"0"..="max"`, then both accumulators.
    pub fn named_grids(&self) -> impl Iterator<Item = (String, &dyn CellIndex)> + '_ {
        self.spaces
            .iter()
            .enumerate()
            .map(|(t, g)| (t.to_string(), g.as_ref()))
            .chain([
                (EVEN_ACCUMULATOR.to_string(), self.even.as_ref()),
                (ODD_ACCUMULATOR.to_string(), self.odd.as_ref()),
            ])
    }

    /// Mutable grid by persisted name.
    pub fn grid_by_name_mut(&mut self, name: &str) -> Option<&mut Box<dyn CellIndex>> {
        match name {
            EVEN_ACCUMULATOR => Some(&mut self.even),
            ODD_ACCUMULATOR => Some(&mut self.odd),
            other => {
                let t: usize = other.parse().ok()?;
                if t.to_string() != other {
                    return None;
                }
                self.spaces.get_mut(t)
            }
        }
    }

    /// Names every persisted grid must carry.
    pub fn grid_names(&self) -> Vec<String> {
        self.named_grids().map(|(name, _)| name).collect()
    }

    /// Whether a special rational's visit stays out of the accumulators.
    fn excluded(&self, t: usize, cycle_length: usize, pos: Point) -> bool {
        if t + cycle_length < self.max {
            return true;
        }
        let edge = C * t as f64;
        let axes = &pos[..self.dim.axes()];
        axes.iter().all(|&p| p == edge) || axes.iter().all(|&p| p == -edge)
    }

    /// Record a visit in its time-step grid and, unless excluded, its accumulator.
    pub fn add(&mut self, is_special: bool, cycle_length: usize, visit: &Visit<'_>) -> Result<(), GridError> {
        let t = visit.t;
        if t > self.max {
            return Err(GridError::TimeOutOfRange { t, max: self.max });
        }
        self.spaces[t]
            .get_or_create(visit.pos)
            .ok_or(GridError::CellOutOfBounds {
                t,
                pos: visit.pos,
                grid: "time step",
            })?
            .record(visit);

        if is_special && self.excluded(t, cycle_length, visit.pos) {
            return Ok(());
        }

        let (accumulator, name) = if t % 2 == 0 {
            (&mut self.even, EVEN_ACCUMULATOR)
        } else {
            (&mut self.odd, ODD_ACCUMULATOR)
        };
        accumulator
            .get_or_create(visit.pos)
            .ok_or(GridError::CellOutOfBounds {
                t,
                pos: visit.pos,
                grid: name,
            })?
            .record(visit);
        Ok(())
    }

    fn same_shape(&self, other: &SpaceSet) -> bool {
        self.dim == other.dim
            && self.max == other.max
            && self.kind == other.kind
            && self.even.horizon() == other.even.horizon()
            && self.odd.horizon() == other.odd.horizon()
    }

    /// Fold every cell of `other` into this set.
    pub fn merge(&mut self, other: &SpaceSet) -> Result<(), GridError> {
        if !self.same_shape(other) {
            return Err(GridError::ShapeMismatch(format!(
                "dim {}/{} max {}/{} index {}/{}",
                self.dim, other.dim, self.max, other.max, self.kind, other.kind
            )));
        }
        for (t, (mine, theirs)) in self.spaces.iter_mut().zip(&other.spaces).enumerate() {
            merge_grid(mine.as_mut(), theirs.as_ref(), t, "time step")?;
        }
        merge_grid(self.even.as_mut(), other.even.as_ref(), self.max, EVEN_ACCUMULATOR)?;
        merge_grid(self.odd.as_mut(), other.odd.as_ref(), self.max, ODD_ACCUMULATOR)?;
        Ok(())
    }

    pub fn clear(&mut self) {
        for space in &mut self.spaces {
            space.clear();
        }
        self.even.clear();
        self.odd.clear();
    }
}

fn merge_grid(
    target: &mut dyn CellIndex,
    source: &dyn CellIndex,
    t: usize,
    name: &'static str,
) -> Result<(), GridError> {
    for cell in source.non_empty() {
        let pos = cell.pos();
        target
            .get_or_create(pos)
            .ok_or(GridError::CellOutOfBounds { t, pos, grid: name })?
            .merge(cell);
    }
    Ok(())
}

impl CellQuery for SpaceSet {
    fn get_cell(&self, t: usize, coords: &[f64], accumulate: bool) -> Option<CellSnapshot> {
        if coords.len() != self.dim.axes() {
            return None;
        }
        self.grid(t, accumulate)?
            .get(point_from(coords))
            .map(|c| c.snapshot())
    }

    fn get_cells(&self, t: usize, accumulate: bool) -> Vec<CellSnapshot> {
        self.grid(t, accumulate)
            .map(|g| g.non_empty().map(|c| c.snapshot()).collect())
            .unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(t: usize, x: f64) -> Visit<'static> {
        Visit {
            t,
            pos: [x, 0.0, 0.0],
            next_digit: 0,
            timing: 1,
            rational: None,
        }
    }

    fn count_at(space: &SpaceSet, t: usize, x: f64, accumulate: bool) -> u64 {
        space.get_cell(t, &[x], accumulate).map_or(0, |c| c.count)
    }

    #[test]
    fn horizon_table() {
        assert_eq!(accumulator_horizons(6, 6), (6, 5));
        assert_eq!(accumulator_horizons(3, 3), (3, 4));
        assert_eq!(accumulator_horizons(9, 9), (8, 9));
        assert_eq!(accumulator_horizons(10, 10), (10, 9));
        assert_eq!(accumulator_horizons(15, 20), (19, 20));
        assert_eq!(accumulator_horizons(6, 0), (0, 0));
    }

    #[test]
    fn horizons_reach_matching_parity_only() {
        assert!(accumulators_reach(6, 6));
        assert!(!accumulators_reach(6, 7));
        assert!(accumulators_reach(3, 4));
        assert!(accumulators_reach(3, 3));
        assert!(accumulators_reach(9, 9));
        assert!(!accumulators_reach(9, 10));
        assert!(!accumulators_reach(10, 11));
        assert!(accumulators_reach(10, 10));
    }

    #[test]
    fn non_special_visits_reach_accumulators() {
        let mut space = SpaceSet::new(&EngineConfig::new(Dim::One, 2, 2));
        space.add(false, 2, &visit(2, 1.0)).unwrap();
        space.add(false, 2, &visit(1, 0.5)).unwrap();
        assert_eq!(count_at(&space, 2, 1.0, false), 1);
        assert_eq!(count_at(&space, 2, 1.0, true), 1);
        assert_eq!(count_at(&space, 1, 0.5, true), 1);
        // accumulators are shared by parity
        assert_eq!(count_at(&space, 0, 1.0, true), 1);
    }

    #[test]
    fn special_corners_are_excluded() {
        let mut space = SpaceSet::new(&EngineConfig::new(Dim::One, 2, 2));
        space.add(true, 2, &visit(2, 1.0)).unwrap();
        space.add(true, 2, &visit(2, -1.0)).unwrap();
        space.add(true, 2, &visit(2, 0.0)).unwrap();
        assert_eq!(count_at(&space, 2, 1.0, false), 1);
        assert_eq!(count_at(&space, 2, -1.0, false), 1);
        assert_eq!(count_at(&space, 2, 1.0, true), 0);
        assert_eq!(count_at(&space, 2, -1.0, true), 0);
        assert_eq!(count_at(&space, 2, 0.0, true), 1);
    }

    #[test]
    fn special_early_times_are_excluded() {
        let mut space = SpaceSet::new(&EngineConfig::new(Dim::One, 2, 6));
        // t + cycle < max
        space.add(true, 2, &visit(3, 0.5)).unwrap();
        assert_eq!(count_at(&space, 3, 0.5, false), 1);
        assert_eq!(count_at(&space, 3, 0.5, true), 0);
        space.add(true, 2, &visit(4, 0.0)).unwrap();
        assert_eq!(count_at(&space, 4, 0.0, true), 1);
    }

    #[test]
    fn mixed_sign_corner_is_not_excluded() {
        let mut config = EngineConfig::new(Dim::Two, 2, 2);
        config.index = IndexKind::Lazy;
        let mut space = SpaceSet::new(&config);
        let mut v = visit(2, 1.0);
        v.pos = [1.0, -1.0, 0.0];
        space.add(true, 2, &v).unwrap();
        assert!(space.get_cell(2, &[1.0, -1.0], true).is_some());
        v.pos = [-1.0, -1.0, 0.0];
        space.add(true, 2, &v).unwrap();
        assert!(space.get_cell(2, &[-1.0, -1.0], true).is_none());
    }

    #[test]
    fn out_of_grid_visit_is_fatal() {
        let mut space = SpaceSet::new(&EngineConfig::new(Dim::One, 2, 2));
        let err = space.add(false, 2, &visit(1, 1.5)).unwrap_err();
        assert!(matches!(err, GridError::CellOutOfBounds { t: 1, grid: "time step", .. }));
        let err = space.add(false, 2, &visit(3, 0.5)).unwrap_err();
        assert_eq!(err, GridError::TimeOutOfRange { t: 3, max: 2 });
    }

    #[test]
    fn queries_outside_range_are_empty() {
        let space = SpaceSet::new(&EngineConfig::new(Dim::One, 2, 2));
        assert!(space.get_cell(5, &[0.0], false).is_none());
        assert!(space.get_cell(0, &[0.0, 0.0], false).is_none());
        assert!(space.get_cells(5, true).is_empty());
        assert_eq!(space.len(), 2);
    }

    #[test]
    fn merge_adds_partials() {
        let config = EngineConfig::new(Dim::One, 2, 2);
        let mut a = SpaceSet::new(&config);
        let mut b = a.empty_like();
        a.add(false, 2, &visit(2, 0.0)).unwrap();
        b.add(false, 2, &visit(2, 0.0)).unwrap();
        b.add(false, 2, &visit(2, -1.0)).unwrap();

        a.merge(&b).unwrap();
        assert_eq!(count_at(&a, 2, 0.0, false), 2);
        assert_eq!(count_at(&a, 2, -1.0, false), 1);
        assert_eq!(count_at(&a, 2, 0.0, true), 2);
    }

    #[test]
    fn merge_rejects_other_shapes() {
        let mut a = SpaceSet::new(&EngineConfig::new(Dim::One, 2, 2));
        let b = SpaceSet::new(&EngineConfig::new(Dim::One, 2, 3));
        assert!(matches!(a.merge(&b), Err(GridError::ShapeMismatch(_))));
    }

    #[test]
    fn grid_names_cover_every_step() {
        let mut space = SpaceSet::new(&EngineConfig::new(Dim::One, 2, 2));
        assert_eq!(
            space.grid_names(),
            vec!["0", "1", "2", EVEN_ACCUMULATOR, ODD_ACCUMULATOR]
        );
        assert!(space.grid_by_name_mut("2").is_some());
        assert!(space.grid_by_name_mut("3").is_none());
        assert!(space.grid_by_name_mut("02").is_none());
        assert!(space.grid_by_name_mut(ODD_ACCUMULATOR).is_some());
    }

    #[test]
    fn clear_empties_all_grids() {
        let mut space = SpaceSet::new(&EngineConfig::new(Dim::One, 2, 2));
        space.add(false, 2, &visit(2, 0.0)).unwrap();
        space.clear();
        for t in 0..=2 {
            assert!(space.get_cells(t, false).is_empty());
            assert!(space.get_cells(t, true).is_empty());
        }
    }
}
