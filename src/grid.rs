use std::fmt;

use crate::cell::{Cell, Point};
use crate::config::{Dim, IndexKind};
use crate::octree::OctreeGrid;
use crate::rational::C;

/// Shared description of every grid in a space set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    pub dim: Dim,
    /// Time step the grid covers; coordinates lie in `[-c·h, c·h]`.
    pub horizon: usize,
    pub track_rationals: bool,
}

impl GridShape {
    pub fn new(dim: Dim, horizon: usize, track_rationals: bool) -> Self {
        Self {
            dim,
            horizon,
            track_rationals,
        }
    }

    /// Lattice points covered by the grid, `(h+1)^dim`.
    pub fn lattice_len(&self) -> usize {
        (self.horizon + 1).pow(self.dim.axes() as u32)
    }

    fn empty_cell(&self, pos: Point) -> Cell {
        Cell::new(self.dim, pos, self.track_rationals)
    }
}

/// Maps positions at one time step to cells.
///
/// Every implementation sees the same writes and yields the same non-empty
/// cells; they only differ in memory layout and lookup cost.
pub trait CellIndex: fmt::Debug + Send + Sync {
    /// The cell at `pos`, created if needed. `None` when `pos` is outside the grid.
    fn get_or_create(&mut self, pos: Point) -> Option<&mut Cell>;

    /// The non-empty cell at `pos`, if any.
    fn get(&self, pos: Point) -> Option<&Cell>;

    /// Every cell with at least one visit.
    fn non_empty(&self) -> Box<dyn Iterator<Item = &Cell> + '_>;

    /// Reset every cell's statistics.
    fn clear(&mut self);

    fn shape(&self) -> GridShape;

    fn kind(&self) -> IndexKind;

    /// A fresh, empty grid of the same kind and shape.
    fn empty_like(&self) -> Box<dyn CellIndex>;

    fn horizon(&self) -> usize {
        self.shape().horizon
    }
}

/// Build an empty grid of the requested kind.
pub fn build(kind: IndexKind, shape: GridShape, octree_depth: usize) -> Box<dyn CellIndex> {
    match kind {
        IndexKind::Dense => Box::new(DenseGrid::new(shape)),
        IndexKind::Lazy => Box::new(LazyGrid::new(shape)),
        IndexKind::Octree => Box::new(OctreeGrid::new(shape, octree_depth)),
    }
}

/// Whether every used coordinate of `pos` is a finite multiple of `c`.
pub fn on_half_lattice(pos: Point, dim: Dim) -> bool {
    pos.iter().take(dim.axes()).all(|&p| {
        let steps = p / C;
        steps.is_finite() && steps.fract() == 0.0
    })
}

/// Flat lattice index of `pos`: per axis `n_k = floor(c·h - pos_k)` in `[0, h]`.
///
/// Coordinates off the half-step lattice have no index.
pub fn lattice_index(pos: Point, dim: Dim, horizon: usize) -> Option<usize> {
    if !on_half_lattice(pos, dim) {
        return None;
    }
    let top = C * horizon as f64;
    let side = horizon + 1;
    let mut index = 0usize;
    let mut stride = 1usize;
    for &coord in pos.iter().take(dim.axes()) {
        let offset = (top - coord).floor();
        if !offset.is_finite() || offset < 0.0 || offset > horizon as f64 {
            return None;
        }
        index += offset as usize * stride;
        stride *= side;
    }
    Some(index)
}

/// Position of the lattice point at flat index `index`.
fn lattice_point(index: usize, dim: Dim, horizon: usize) -> Point {
    let top = C * horizon as f64;
    let side = horizon + 1;
    let mut rest = index;
    let mut p = [0.0; 3];
    for slot in p.iter_mut().take(dim.axes()) {
        *slot = top - (rest % side) as f64;
        rest /= side;
    }
    p
}

// ── Dense ───────────────────────────────────────────────────────────────────

/// Every lattice cell allocated up front.
#[derive(Debug, Clone)]
pub struct DenseGrid {
    shape: GridShape,
    cells: Vec<Cell>,
}

impl DenseGrid {
    pub fn new(shape: GridShape) -> Self {
        let cells = (0..shape.lattice_len())
            .map(|i| shape.empty_cell(lattice_point(i, shape.dim, shape.horizon)))
            .collect();
        Self { shape, cells }
    }
}

impl CellIndex for DenseGrid {
    fn get_or_create(&mut self, pos: Point) -> Option<&mut Cell> {
        let i = lattice_index(pos, self.shape.dim, self.shape.horizon)?;
        let cell = &mut self.cells[i];
        // Accumulators may receive points of the other parity than their horizon.
        if cell.is_empty() {
            cell.place(pos);
        }
        Some(cell)
    }

    fn get(&self, pos: Point) -> Option<&Cell> {
        let i = lattice_index(pos, self.shape.dim, self.shape.horizon)?;
        self.cells.get(i).filter(|c| !c.is_empty())
    }

    fn non_empty(&self) -> Box<dyn Iterator<Item = &Cell> + '_> {
        Box::new(self.cells.iter().filter(|c| !c.is_empty()))
    }

    fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }

    fn shape(&self) -> GridShape {
        self.shape
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Dense
    }

    fn empty_like(&self) -> Box<dyn CellIndex> {
        Box::new(DenseGrid::new(self.shape))
    }
}

// ── Lazy ────────────────────────────────────────────────────────────────────

const EMPTY_SLOT: u32 = u32::MAX;

/// Lattice slot table; cells are allocated on first write.
#[derive(Debug, Clone)]
pub struct LazyGrid {
    shape: GridShape,
    slots: Vec<u32>,
    cells: Vec<Cell>,
}

impl LazyGrid {
    pub fn new(shape: GridShape) -> Self {
        Self {
            shape,
            slots: vec![EMPTY_SLOT; shape.lattice_len()],
            cells: Vec::new(),
        }
    }

    /// Number of cells allocated so far.
    pub fn allocated(&self) -> usize {
        self.cells.len()
    }
}

impl CellIndex for LazyGrid {
    fn get_or_create(&mut self, pos: Point) -> Option<&mut Cell> {
        let i = lattice_index(pos, self.shape.dim, self.shape.horizon)?;
        let slot = match self.slots[i] {
            EMPTY_SLOT => {
                let slot = self.cells.len();
                self.cells.push(self.shape.empty_cell(pos));
                self.slots[i] = slot as u32;
                slot
            }
            s => s as usize,
        };
        let cell = &mut self.cells[slot];
        if cell.is_empty() {
            cell.place(pos);
        }
        Some(cell)
    }

    fn get(&self, pos: Point) -> Option<&Cell> {
        let i = lattice_index(pos, self.shape.dim, self.shape.horizon)?;
        match self.slots[i] {
            EMPTY_SLOT => None,
            s => self.cells.get(s as usize).filter(|c| !c.is_empty()),
        }
    }

    fn non_empty(&self) -> Box<dyn Iterator<Item = &Cell> + '_> {
        Box::new(
            self.slots
                .iter()
                .filter(|&&s| s != EMPTY_SLOT)
                .map(|&s| &self.cells[s as usize])
                .filter(|c| !c.is_empty()),
        )
    }

    fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.clear();
        }
    }

    fn shape(&self) -> GridShape {
        self.shape
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Lazy
    }

    fn empty_like(&self) -> Box<dyn CellIndex> {
        Box::new(LazyGrid::new(self.shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sorted_cells(grid: &dyn CellIndex) -> Vec<(Vec<i64>, u64, Vec<u64>, i64)> {
        let mut out: Vec<_> = grid
            .non_empty()
            .map(|c| {
                let snap = c.snapshot();
                let key = snap.pos.iter().map(|v| (v * 2.0) as i64).collect();
                (key, snap.count, snap.next_digits, c.time_sum() as i64)
            })
            .collect();
        out.sort();
        out
    }

    /// A random point reachable at time `t`: every axis is `c·t - k`, `k` in `[0, t]`.
    fn random_point(rng: &mut StdRng, dim: Dim, t: usize) -> Point {
        let mut p = [0.0; 3];
        for slot in p.iter_mut().take(dim.axes()) {
            let k = rng.gen_range(0..=t);
            *slot = C * t as f64 - k as f64;
        }
        p
    }

    #[test]
    fn lattice_index_1d() {
        // h = 2 → x ∈ {1, 0, -1}
        assert_eq!(lattice_index([1.0, 0.0, 0.0], Dim::One, 2), Some(0));
        assert_eq!(lattice_index([0.0, 0.0, 0.0], Dim::One, 2), Some(1));
        assert_eq!(lattice_index([-1.0, 0.0, 0.0], Dim::One, 2), Some(2));
        assert_eq!(lattice_index([2.0, 0.0, 0.0], Dim::One, 2), None);
        assert_eq!(lattice_index([-2.0, 0.0, 0.0], Dim::One, 2), None);
    }

    #[test]
    fn lattice_index_3d_strides() {
        // h = 1 → each axis ∈ {0.5, -0.5}, side 2
        assert_eq!(lattice_index([0.5, 0.5, 0.5], Dim::Three, 1), Some(0));
        assert_eq!(lattice_index([-0.5, 0.5, 0.5], Dim::Three, 1), Some(1));
        assert_eq!(lattice_index([0.5, -0.5, 0.5], Dim::Three, 1), Some(2));
        assert_eq!(lattice_index([0.5, 0.5, -0.5], Dim::Three, 1), Some(4));
        assert_eq!(lattice_index([-0.5, -0.5, -0.5], Dim::Three, 1), Some(7));
    }

    #[test]
    fn lattice_point_inverts_index() {
        for dim in [Dim::One, Dim::Two, Dim::Three] {
            let shape = GridShape::new(dim, 4, false);
            for i in 0..shape.lattice_len() {
                let p = lattice_point(i, dim, 4);
                assert_eq!(lattice_index(p, dim, 4), Some(i));
            }
        }
    }

    #[test]
    fn dense_preallocates_every_cell() {
        let grid = DenseGrid::new(GridShape::new(Dim::Two, 3, false));
        assert_eq!(grid.cells.len(), 16);
        assert_eq!(grid.non_empty().count(), 0);
    }

    #[test]
    fn lazy_allocates_on_first_write() {
        let mut grid = LazyGrid::new(GridShape::new(Dim::Two, 3, false));
        assert_eq!(grid.allocated(), 0);
        grid.get_or_create([1.5, -0.5, 0.0]).unwrap().add(0, 0);
        grid.get_or_create([1.5, -0.5, 0.0]).unwrap().add(0, 1);
        assert_eq!(grid.allocated(), 1);
        assert_eq!(grid.get([1.5, -0.5, 0.0]).unwrap().count(), 2);
        assert!(grid.get([-1.5, -0.5, 0.0]).is_none());
    }

    #[test]
    fn out_of_range_is_none() {
        for kind in [IndexKind::Dense, IndexKind::Lazy, IndexKind::Octree] {
            let mut grid = build(kind, GridShape::new(Dim::One, 2, false), 6);
            assert!(grid.get_or_create([1.5, 0.0, 0.0]).is_none(), "{kind}");
            assert!(grid.get([1.5, 0.0, 0.0]).is_none(), "{kind}");
        }
    }

    #[test]
    fn off_lattice_positions_are_none() {
        for kind in [IndexKind::Dense, IndexKind::Lazy, IndexKind::Octree] {
            let mut grid = build(kind, GridShape::new(Dim::Two, 2, false), 6);
            assert!(grid.get_or_create([0.7, 0.0, 0.0]).is_none(), "{kind}");
            assert!(grid.get_or_create([0.0, 0.25, 0.0]).is_none(), "{kind}");
            assert!(grid.get([0.7, 0.0, 0.0]).is_none(), "{kind}");
            assert!(grid.get_or_create([0.5, -1.0, 0.0]).is_some(), "{kind}");
        }
        assert!(on_half_lattice([1.5, -2.0, 0.3], Dim::Two));
        assert!(!on_half_lattice([f64::NAN, 0.0, 0.0], Dim::One));
    }

    #[test]
    fn non_empty_follows_lattice_order() {
        let shape = GridShape::new(Dim::Two, 2, false);
        let writes = [[-1.0, 0.0, 0.0], [1.0, -1.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0], [0.0, -1.0, 0.0]];
        let expected: Vec<Point> = vec![
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [-1.0, 0.0, 0.0],
            [1.0, -1.0, 0.0],
            [0.0, -1.0, 0.0],
        ];
        for kind in [IndexKind::Dense, IndexKind::Lazy, IndexKind::Octree] {
            let mut grid = build(kind, shape, 6);
            for pos in writes {
                grid.get_or_create(pos).unwrap().add(0, 0);
            }
            let order: Vec<Point> = grid.non_empty().map(|c| c.pos()).collect();
            assert_eq!(order, expected, "{kind}");
        }
    }

    #[test]
    fn get_skips_empty_cells() {
        let mut grid = DenseGrid::new(GridShape::new(Dim::One, 2, false));
        assert!(grid.get([0.0, 0.0, 0.0]).is_none());
        grid.get_or_create([0.0, 0.0, 0.0]).unwrap();
        assert!(grid.get([0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn clear_keeps_shape() {
        let mut grid = LazyGrid::new(GridShape::new(Dim::One, 4, false));
        grid.get_or_create([2.0, 0.0, 0.0]).unwrap().add(1, 1);
        grid.clear();
        assert_eq!(grid.non_empty().count(), 0);
        assert_eq!(grid.allocated(), 1);
        assert_eq!(grid.horizon(), 4);
    }

    #[test]
    fn dense_accepts_other_parity() {
        // Horizon 3 grid fed with integer coordinates, as the odd accumulator
        // can be when T is even.
        let mut grid = DenseGrid::new(GridShape::new(Dim::One, 3, false));
        grid.get_or_create([1.0, 0.0, 0.0]).unwrap().add(0, 0);
        grid.get_or_create([-1.0, 0.0, 0.0]).unwrap().add(0, 1);
        let positions: Vec<Point> = grid.non_empty().map(|c| c.pos()).collect();
        assert_eq!(positions, vec![[1.0, 0.0, 0.0], [-1.0, 0.0, 0.0]]);
        assert_eq!(grid.get([1.0, 0.0, 0.0]).unwrap().count(), 1);
    }

    #[test]
    fn all_index_kinds_agree_on_random_writes() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for dim in [Dim::One, Dim::Two, Dim::Three] {
            for horizon in [1usize, 4, 7] {
                let shape = GridShape::new(dim, horizon, false);
                let mut grids = [
                    build(IndexKind::Dense, shape, 6),
                    build(IndexKind::Lazy, shape, 6),
                    build(IndexKind::Octree, shape, 6),
                ];
                let base = dim.base() as u8;
                for _ in 0..500 {
                    let pos = random_point(&mut rng, dim, horizon);
                    let timing = rng.gen_range(0..20u64);
                    let digit = rng.gen_range(0..base);
                    for grid in grids.iter_mut() {
                        grid.get_or_create(pos).unwrap().add(timing, digit);
                    }
                }
                let dense = sorted_cells(grids[0].as_ref());
                assert!(!dense.is_empty());
                assert_eq!(dense, sorted_cells(grids[1].as_ref()), "lazy dim={dim} h={horizon}");
                assert_eq!(dense, sorted_cells(grids[2].as_ref()), "octree dim={dim} h={horizon}");
            }
        }
    }
}
