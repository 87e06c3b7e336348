//! Rational trajectories under base-`2^dim` long division, aggregated into
//! per-time-step spatial grids.
//!
//! A [`TrajectoryAggregator`] builds the trajectory of every m/n for one
//! denominator, replays them through a [`SpaceSet`] and exposes the resulting
//! cells through [`CellQuery`]. Grids can be persisted with [`persist`].

pub mod aggregate;
pub mod cell;
pub mod config;
pub mod denominators;
pub mod error;
pub mod families;
pub mod grid;
pub mod octree;
pub mod persist;
pub mod rational;
pub mod space;
pub mod stats;

pub use aggregate::{CancelToken, Origin, Progress, ProgressHandle, TrajectoryAggregator};
pub use cell::{Cell, CellSnapshot, Point};
pub use config::{Dim, EngineConfig, IndexKind};
pub use error::{AggregateError, CatalogError, GridError, PersistError, TrajectoryError};
pub use persist::{CellRecord, GridDocument};
pub use rational::RationalTrajectory;
pub use space::{CellQuery, SpaceSet};
