use thiserror::Error;

use crate::cell::Point;

/// Failures while building a single rational trajectory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrajectoryError {
    #[error("denominator must be positive")]
    ZeroDenominator,
    #[error("numerator {m} exceeds denominator {n}")]
    NumeratorOutOfRange { m: u64, n: u64 },
    #[error("long division of {m}/{n} in dim {dim} never returned to remainder {m}")]
    NoCycle { m: u64, n: u64, dim: u8 },
}

/// Failures while writing into a grid.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GridError {
    #[error("time step {t} is beyond the horizon {max}")]
    TimeOutOfRange { t: usize, max: usize },
    #[error("no cell for {pos:?} at time {t} ({grid})")]
    CellOutOfBounds {
        t: usize,
        pos: Point,
        grid: &'static str,
    },
    #[error("cannot merge grids of different shape: {0}")]
    ShapeMismatch(String),
}

/// Failures while reading or writing a persisted grid document.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing space \"{0}\"")]
    MissingSpace(String),
    #[error("unexpected space \"{0}\"")]
    UnexpectedSpace(String),
    #[error("invalid cell in space \"{space}\": {reason}")]
    InvalidCell { space: String, reason: String },
    #[error("invalid document header: {0}")]
    InvalidHeader(String),
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Failures of the aggregation pipeline as a whole.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("rational set construction failed: {0}")]
    Trajectory(#[from] TrajectoryError),
    #[error("aggregation failed: {0}")]
    Grid(#[from] GridError),
    #[error("worker pool could not be built: {0}")]
    Pool(String),
    #[error("no rational set installed for this aggregation")]
    EmptyRationalSet,
    #[error("origin time {t} is beyond the horizon {max}")]
    OriginOutOfRange { t: usize, max: usize },
    #[error("origin {coords:?} is not on the half-step lattice of the used axes")]
    InvalidOrigin { coords: Point },
    #[error("computation cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failures of the denominator catalog.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("{base}^{period} - 1 does not fit in 64 bits")]
    Overflow { base: u64, period: u32 },
    #[error("period must be positive")]
    ZeroPeriod,
}
