use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AggregateError, PersistError};
use crate::space::{accumulator_horizons, accumulators_reach};

/// Deepest octree subdivision accepted by [`EngineConfig::validate`].
pub const MAX_OCTREE_DEPTH: usize = 16;

/// Spatial dimension of the walk. The digit base is `2^dim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Dim {
    One = 1,
    Two = 2,
    Three = 3,
}

impl Dim {
    /// Number of spatial axes.
    pub fn axes(self) -> usize {
        self as usize
    }

    /// Digit base, `2^dim`.
    pub fn base(self) -> u64 {
        1 << (self as u32)
    }
}

impl TryFrom<u8> for Dim {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Dim::One),
            2 => Ok(Dim::Two),
            3 => Ok(Dim::Three),
            other => Err(format!("dimension must be 1, 2 or 3, got {other}")),
        }
    }
}

impl From<Dim> for u8 {
    fn from(dim: Dim) -> u8 {
        dim as u8
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// Which [`CellIndex`](crate::grid::CellIndex) implementation backs every grid of a space set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Every cell pre-allocated, addressed by the lattice formula.
    #[default]
    Dense,
    /// Lattice formula into a slot table, cells allocated on first write.
    Lazy,
    /// Bounding-box subdivision with tolerant matching inside the leaves.
    Octree,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexKind::Dense => "dense",
            IndexKind::Lazy => "lazy",
            IndexKind::Octree => "octree",
        };
        f.write_str(s)
    }
}

impl FromStr for IndexKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dense" => Ok(IndexKind::Dense),
            "lazy" | "lazy-indexed" => Ok(IndexKind::Lazy),
            "octree" => Ok(IndexKind::Octree),
            other => Err(format!("unknown index kind: {other}")),
        }
    }
}

/// Configuration of a spacetime run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Spatial dimension (1, 2 or 3).
    pub dim: Dim,
    /// Digit-cycle modulus T; drives the accumulator exclusion window and sizing.
    #[serde(rename = "T")]
    pub t_modulus: usize,
    /// Last simulated time step.
    pub max: usize,
    /// Grid backend.
    pub index: IndexKind,
    /// Maximum octree depth (ignored by the lattice backends).
    pub octree_depth: usize,
    /// Record which rationals contributed to every cell.
    pub track_rationals: bool,
    /// Worker threads; `None` uses the available parallelism.
    pub workers: Option<usize>,
    /// Work partitions per worker during aggregation.
    pub chunks_per_worker: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dim: Dim::One,
            t_modulus: 6,
            max: 6,
            index: IndexKind::Dense,
            octree_depth: 6,
            track_rationals: false,
            workers: None,
            chunks_per_worker: 4,
        }
    }
}

impl EngineConfig {
    pub fn new(dim: Dim, t_modulus: usize, max: usize) -> Self {
        Self {
            dim,
            t_modulus,
            max,
            ..Self::default()
        }
    }

    pub fn with_index(mut self, index: IndexKind) -> Self {
        self.index = index;
        self
    }

    pub fn with_rationals(mut self, track: bool) -> Self {
        self.track_rationals = track;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Read a JSON config file. Missing keys take their default values.
    pub fn from_path(path: &Path) -> Result<Self, PersistError> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run.
    pub fn validate(&self) -> Result<(), AggregateError> {
        if self.max == 0 {
            return Err(AggregateError::Config("max must be at least 1".into()));
        }
        if self.t_modulus == 0 {
            return Err(AggregateError::Config("T must be at least 1".into()));
        }
        if !accumulators_reach(self.t_modulus, self.max) {
            let (even, odd) = accumulator_horizons(self.t_modulus, self.max);
            return Err(AggregateError::Config(format!(
                "accumulator horizons ({even}, {odd}) for T={} do not reach max={}",
                self.t_modulus, self.max
            )));
        }
        if self.index == IndexKind::Octree
            && (self.octree_depth == 0 || self.octree_depth > MAX_OCTREE_DEPTH)
        {
            return Err(AggregateError::Config(format!(
                "octree depth must be in 1..={MAX_OCTREE_DEPTH}, got {}",
                self.octree_depth
            )));
        }
        if self.workers == Some(0) {
            return Err(AggregateError::Config("workers must be at least 1".into()));
        }
        if self.chunks_per_worker == 0 {
            return Err(AggregateError::Config(
                "chunks_per_worker must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
