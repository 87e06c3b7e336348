use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::cell::{CellSnapshot, Point, Visit};
use crate::config::EngineConfig;
use crate::error::{AggregateError, GridError};
use crate::grid::on_half_lattice;
use crate::rational::RationalTrajectory;
use crate::space::{CellQuery, SpaceSet};

/// Shared flag that stops a running computation at the next chunk boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Re-arm the token for the next computation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Counters updated by the workers while a computation runs.
#[derive(Debug, Default)]
struct ProgressCounters {
    built: AtomicU64,
    replayed: AtomicU64,
    total: AtomicU64,
}

/// Snapshot of aggregation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Trajectories constructed by the last `set_rational_set`.
    pub built: u64,
    /// Trajectories replayed by the running or last `add_rational_set`.
    pub replayed: u64,
    /// Size of the installed (or in-construction) rational set.
    pub total: u64,
}

/// Cloneable read handle on the progress counters.
#[derive(Debug, Clone)]
pub struct ProgressHandle(Arc<ProgressCounters>);

impl ProgressHandle {
    pub fn get(&self) -> Progress {
        Progress {
            built: self.0.built.load(Ordering::Relaxed),
            replayed: self.0.replayed.load(Ordering::Relaxed),
            total: self.0.total.load(Ordering::Relaxed),
        }
    }
}

/// Starting point of every trajectory in an aggregation pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Origin {
    pub t: usize,
    pub coords: Point,
}

impl Origin {
    pub fn new(t: usize, coords: Point) -> Self {
        Self { t, coords }
    }
}

/// Builds the rational set for a denominator and folds every trajectory into a [`SpaceSet`].
#[derive(Debug)]
pub struct TrajectoryAggregator {
    config: EngineConfig,
    n: u64,
    special: bool,
    rationals: Vec<RationalTrajectory>,
    space: SpaceSet,
    pool: rayon::ThreadPool,
    cancel: CancelToken,
    progress: Arc<ProgressCounters>,
}

impl TrajectoryAggregator {
    pub fn new(config: EngineConfig) -> Result<Self, AggregateError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.unwrap_or(0))
            .thread_name(|i| format!("spacetime-worker-{i}"))
            .build()
            .map_err(|e| AggregateError::Pool(e.to_string()))?;
        log::debug!("worker pool ready with {} threads", pool.current_num_threads());

        let space = SpaceSet::new(&config);
        Ok(Self {
            config,
            n: 0,
            special: false,
            rationals: Vec::new(),
            space,
            pool,
            cancel: CancelToken::new(),
            progress: Arc::new(ProgressCounters::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Denominator of the installed rational set (0 after `clear`).
    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn is_special(&self) -> bool {
        self.special
    }

    pub fn rationals(&self) -> &[RationalTrajectory] {
        &self.rationals
    }

    pub fn space(&self) -> &SpaceSet {
        &self.space
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> ProgressHandle {
        ProgressHandle(self.progress.clone())
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Contiguous work-partition length for `total` items.
    fn chunk_len(&self, total: usize) -> usize {
        let parts = self.workers() * self.config.chunks_per_worker;
        total.div_ceil(parts.max(1)).max(1)
    }

    /// Build the trajectory of every m/n, m in `[0, n]`, and install it.
    ///
    /// On failure the previously installed set is kept.
    pub fn set_rational_set(&mut self, n: u64, is_special: bool) -> Result<(), AggregateError> {
        let start = Instant::now();
        let dim = self.config.dim;
        let total = usize::try_from(n)
            .ok()
            .and_then(|n| n.checked_add(1))
            .ok_or_else(|| AggregateError::Config(format!("denominator {n} is too large")))?;
        let chunk = self.chunk_len(total) as u64;
        let ranges: Vec<(u64, u64)> = (0..total as u64)
            .step_by(chunk as usize)
            .map(|lo| (lo, (lo + chunk).min(total as u64)))
            .collect();
        log::debug!("building {total} rationals for n={n} in {} chunks", ranges.len());

        self.progress.built.store(0, Ordering::Relaxed);
        self.progress.total.store(total as u64, Ordering::Relaxed);
        let cancel = &self.cancel;
        let progress = &self.progress;

        let built: Result<Vec<Vec<RationalTrajectory>>, AggregateError> = self.pool.install(|| {
            ranges
                .par_iter()
                .map(|&(lo, hi)| {
                    if cancel.is_cancelled() {
                        return Err(AggregateError::Cancelled);
                    }
                    let part = (lo..hi)
                        .map(|m| RationalTrajectory::new(m, n, dim))
                        .collect::<Result<Vec<_>, _>>()?;
                    progress.built.fetch_add(part.len() as u64, Ordering::Relaxed);
                    Ok(part)
                })
                .collect()
        });

        let rationals: Vec<RationalTrajectory> = match built {
            Ok(parts) => parts.into_iter().flatten().collect(),
            Err(e) => {
                self.progress.total.store(self.rationals.len() as u64, Ordering::Relaxed);
                return Err(e);
            }
        };

        let longest = rationals.iter().map(|r| r.period()).max().unwrap_or(0);
        self.rationals = rationals;
        self.n = n;
        self.special = is_special;
        log::info!(
            "rational set for n={n} ready: {} trajectories, longest period {longest} ({:.2?})",
            self.rationals.len(),
            start.elapsed()
        );
        Ok(())
    }

    /// Replay every installed trajectory from `origin` up to `max` and fold the visits in.
    ///
    /// Each worker folds contiguous m chunks into one private partial space
    /// set; partials are reduced pairwise in m order as they finish. On error
    /// or cancellation the current space set is left as it was.
    pub fn add_rational_set(&mut self, is_special: bool, origin: Origin) -> Result<(), AggregateError> {
        if self.rationals.is_empty() {
            return Err(AggregateError::EmptyRationalSet);
        }
        let max = self.space.max();
        if origin.t > max {
            return Err(AggregateError::OriginOutOfRange { t: origin.t, max });
        }
        let dim = self.space.dim();
        if !on_half_lattice(origin.coords, dim) || origin.coords[dim.axes()..].iter().any(|&c| c != 0.0) {
            return Err(AggregateError::InvalidOrigin { coords: origin.coords });
        }

        if is_special != self.special {
            log::warn!(
                "aggregating with special={is_special} but the rational set for n={} was built with special={}",
                self.n,
                self.special
            );
        }

        let start = Instant::now();
        let chunk = self.chunk_len(self.rationals.len());
        let cycle = self.config.t_modulus;
        let track = self.config.track_rationals;
        let template = &self.space;
        let cancel = &self.cancel;
        let progress = &self.progress;
        progress.replayed.store(0, Ordering::Relaxed);

        let combined: Result<SpaceSet, AggregateError> = self.pool.install(|| {
            self.rationals
                .par_chunks(chunk)
                .try_fold(
                    || template.empty_like(),
                    |mut partial, rationals| {
                        if cancel.is_cancelled() {
                            return Err(AggregateError::Cancelled);
                        }
                        for r in rationals {
                            replay(&mut partial, r, is_special, cycle, origin, track)?;
                        }
                        progress
                            .replayed
                            .fetch_add(rationals.len() as u64, Ordering::Relaxed);
                        log::debug!(
                            "replayed m={}..={}",
                            rationals.first().map_or(0, |r| r.m()),
                            rationals.last().map_or(0, |r| r.m())
                        );
                        Ok(partial)
                    },
                )
                .try_reduce(
                    || template.empty_like(),
                    |mut left, right| {
                        left.merge(&right)?;
                        Ok(left)
                    },
                )
        });
        let combined = combined?;
        if self.cancel.is_cancelled() {
            return Err(AggregateError::Cancelled);
        }
        self.space.merge(&combined)?;

        log::info!(
            "aggregated {} rationals over {} steps from t={} ({:.2?})",
            self.rationals.len(),
            max - origin.t + 1,
            origin.t,
            start.elapsed()
        );
        Ok(())
    }

    /// Reset n, the special flag and every grid. The rational set is kept.
    pub fn clear(&mut self) {
        self.n = 0;
        self.special = false;
        self.space.clear();
    }

    /// Install a space set restored from disk along with its header values.
    ///
    /// Drops the rational set; call `set_rational_set` before aggregating again.
    pub fn install(&mut self, space: SpaceSet, n: u64, special: bool) {
        self.config.dim = space.dim();
        self.config.t_modulus = space.t_modulus();
        self.config.max = space.max();
        self.config.track_rationals = space.tracks_rationals();
        self.space = space;
        self.n = n;
        self.special = special;
        self.rationals = Vec::new();
        self.progress.built.store(0, Ordering::Relaxed);
        self.progress.replayed.store(0, Ordering::Relaxed);
        self.progress.total.store(0, Ordering::Relaxed);
    }
}

/// Fold one trajectory into `space`, starting at `origin`.
fn replay(
    space: &mut SpaceSet,
    r: &RationalTrajectory,
    is_special: bool,
    cycle: usize,
    origin: Origin,
    track: bool,
) -> Result<(), GridError> {
    for rt in 0..=space.max() - origin.t {
        let t = origin.t + rt;
        let p = r.position(rt);
        let visit = Visit {
            t,
            pos: [
                p[0] + origin.coords[0],
                p[1] + origin.coords[1],
                p[2] + origin.coords[2],
            ],
            next_digit: r.digit(t + 1),
            timing: r.timing(t),
            rational: track.then_some(r),
        };
        space.add(is_special, cycle, &visit)?;
    }
    Ok(())
}

impl CellQuery for TrajectoryAggregator {
    fn get_cell(&self, t: usize, coords: &[f64], accumulate: bool) -> Option<CellSnapshot> {
        self.space.get_cell(t, coords, accumulate)
    }

    fn get_cells(&self, t: usize, accumulate: bool) -> Vec<CellSnapshot> {
        self.space.get_cells(t, accumulate)
    }

    fn len(&self) -> usize {
        self.space.len()
    }
}
