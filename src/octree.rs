use std::cmp::Ordering;

use crate::cell::{Cell, Point};
use crate::config::IndexKind;
use crate::grid::{on_half_lattice, CellIndex, GridShape};
use crate::rational::C;

/// Maximum distance at which a leaf entry matches a lookup.
pub const MATCH_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone)]
struct Node {
    min: Point,
    max: Point,
    level: usize,
    children: [Option<u32>; 8],
    /// Indices into the grid's cell list (leaves only).
    entries: Vec<u32>,
}

impl Node {
    fn new(min: Point, max: Point, level: usize) -> Self {
        Self {
            min,
            max,
            level,
            children: [None; 8],
            entries: Vec::new(),
        }
    }

    fn contains(&self, p: Point) -> bool {
        (0..3).all(|k| self.min[k] <= p[k] && p[k] <= self.max[k])
    }

    fn centre(&self) -> Point {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Child slot for `p`: bit `k` is set when `p` lies below the centre on axis `k`.
    fn child_slot(&self, p: Point, axes: usize) -> usize {
        let centre = self.centre();
        (0..axes)
            .filter(|&k| p[k] < centre[k])
            .fold(0, |slot, k| slot | (1 << k))
    }

    fn child_box(&self, slot: usize, axes: usize) -> (Point, Point) {
        let centre = self.centre();
        let mut min = self.min;
        let mut max = self.max;
        for k in 0..axes {
            if slot & (1 << k) == 0 {
                min[k] = centre[k];
            } else {
                max[k] = centre[k];
            }
        }
        (min, max)
    }
}

/// Sparse grid that subdivides its bounding box on demand.
///
/// The root box spans `[-c·h, c·h]` on every used axis and `[0, 0]` on the
/// others. Leaves keep a short list of cells matched by distance.
#[derive(Debug, Clone)]
pub struct OctreeGrid {
    shape: GridShape,
    depth: usize,
    max_depth: usize,
    nodes: Vec<Node>,
    cells: Vec<Cell>,
}

impl OctreeGrid {
    pub fn new(shape: GridShape, max_depth: usize) -> Self {
        let d = C * shape.horizon as f64;
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for k in 0..shape.dim.axes() {
            min[k] = -d;
            max[k] = d;
        }
        Self {
            shape,
            depth: max_depth.min(shape.horizon),
            max_depth,
            nodes: vec![Node::new(min, max, 0)],
            cells: Vec::new(),
        }
    }

    /// Subdivision levels below the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Walk down to the leaf holding `pos`, creating missing nodes on the way.
    fn leaf_or_create(&mut self, pos: Point) -> Option<usize> {
        if !on_half_lattice(pos, self.shape.dim) || !self.nodes[0].contains(pos) {
            return None;
        }
        let axes = self.shape.dim.axes();
        let mut current = 0usize;
        while self.nodes[current].level < self.depth {
            let slot = self.nodes[current].child_slot(pos, axes);
            current = match self.nodes[current].children[slot] {
                Some(child) => child as usize,
                None => {
                    let (min, max) = self.nodes[current].child_box(slot, axes);
                    let level = self.nodes[current].level + 1;
                    let child = self.nodes.len();
                    self.nodes.push(Node::new(min, max, level));
                    self.nodes[current].children[slot] = Some(child as u32);
                    child
                }
            };
        }
        Some(current)
    }

    fn find_leaf(&self, pos: Point) -> Option<usize> {
        if !on_half_lattice(pos, self.shape.dim) || !self.nodes[0].contains(pos) {
            return None;
        }
        let axes = self.shape.dim.axes();
        let mut current = 0usize;
        while self.nodes[current].level < self.depth {
            let slot = self.nodes[current].child_slot(pos, axes);
            current = self.nodes[current].children[slot]? as usize;
        }
        Some(current)
    }

    fn scan(&self, leaf: usize, pos: Point) -> Option<usize> {
        self.nodes[leaf]
            .entries
            .iter()
            .map(|&i| i as usize)
            .find(|&i| distance(self.cells[i].pos(), pos) < MATCH_TOLERANCE)
    }
}

fn distance(a: Point, b: Point) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

impl CellIndex for OctreeGrid {
    fn get_or_create(&mut self, pos: Point) -> Option<&mut Cell> {
        let leaf = self.leaf_or_create(pos)?;
        let index = match self.scan(leaf, pos) {
            Some(i) => i,
            None => {
                let i = self.cells.len();
                self.cells.push(Cell::new(self.shape.dim, pos, self.shape.track_rationals));
                self.nodes[leaf].entries.push(i as u32);
                i
            }
        };
        Some(&mut self.cells[index])
    }

    fn get(&self, pos: Point) -> Option<&Cell> {
        let leaf = self.find_leaf(pos)?;
        let i = self.scan(leaf, pos)?;
        Some(&self.cells[i]).filter(|c| !c.is_empty())
    }

    /// Non-empty cells in lattice order: last axis outermost, each axis from `+c·h` down.
    fn non_empty(&self) -> Box<dyn Iterator<Item = &Cell> + '_> {
        let axes = self.shape.dim.axes();
        let mut cells: Vec<&Cell> = self.cells.iter().filter(|c| !c.is_empty()).collect();
        cells.sort_by(|a, b| {
            let (a, b) = (a.pos(), b.pos());
            (0..axes)
                .rev()
                .map(|k| b[k].total_cmp(&a[k]))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Box::new(cells.into_iter())
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
        IndexKind::Octree
    }

    fn empty_like(&self) -> Box<dyn CellIndex> {
        Box::new(OctreeGrid::new(self.shape, self.max_depth))
    }
}
