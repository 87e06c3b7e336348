use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregate::TrajectoryAggregator;
use crate::cell::{point_from, Cell};
use crate::config::{Dim, EngineConfig};
use crate::error::PersistError;
use crate::families::RationalFamily;
use crate::grid::{on_half_lattice, CellIndex};
use crate::space::SpaceSet;

/// Full persisted state of a space set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridDocument {
    pub dim: Dim,
    /// Denominator of the rational set that produced the grids.
    pub num: u64,
    pub special: bool,
    #[serde(rename = "T")]
    pub t_modulus: usize,
    pub max: usize,
    /// `"0"..="max"`, `"accumulates_even"` and `"accumulates_odd"`.
    pub spaces: BTreeMap<String, Vec<CellRecord>>,
}

/// One non-empty cell as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CellRecord {
    pub pos: Vec<f64>,
    pub count: u64,
    /// Average timing metric.
    pub time: f64,
    pub next_digits: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationals: Option<Vec<RationalFamily>>,
}

impl CellRecord {
    fn from_cell(cell: &Cell) -> Self {
        let snap = cell.snapshot();
        Self {
            pos: snap.pos,
            count: snap.count,
            time: snap.time,
            next_digits: snap
                .next_digits
                .iter()
                .enumerate()
                .map(|(d, &v)| (d.to_string(), v))
                .collect(),
            rationals: snap.rationals,
        }
    }

    /// Histogram in digit order, checked against the base and the count.
    fn histogram(&self, dim: Dim) -> Result<Vec<u64>, String> {
        let base = dim.base() as usize;
        if self.next_digits.len() != base {
            return Err(format!(
                "expected {base} next_digits entries, found {}",
                self.next_digits.len()
            ));
        }
        let mut digits = Vec::with_capacity(base);
        for d in 0..base {
            let v = self
                .next_digits
                .get(&d.to_string())
                .ok_or_else(|| format!("next_digits is missing digit {d}"))?;
            digits.push(*v);
        }
        let sum: u64 = digits.iter().sum();
        if sum != self.count {
            return Err(format!("next_digits sum {sum} differs from count {}", self.count));
        }
        Ok(digits)
    }

    fn validate(&self, dim: Dim) -> Result<Vec<u64>, String> {
        if self.pos.len() != dim.axes() {
            return Err(format!(
                "pos has {} coordinates, dimension is {dim}",
                self.pos.len()
            ));
        }
        if self.pos.iter().any(|p| !p.is_finite()) {
            return Err("pos is not finite".into());
        }
        if !on_half_lattice(point_from(&self.pos), dim) {
            return Err(format!("pos {:?} is not a multiple of the half step", self.pos));
        }
        if self.count == 0 {
            return Err("count must be positive".into());
        }
        if !self.time.is_finite() || self.time < 0.0 {
            return Err(format!("invalid average time {}", self.time));
        }
        self.histogram(dim)
    }
}

/// Capture every non-empty cell of `space`.
pub fn save(space: &SpaceSet, num: u64, special: bool) -> GridDocument {
    let spaces = space
        .named_grids()
        .map(|(name, grid)| (name, grid.non_empty().map(CellRecord::from_cell).collect()))
        .collect();
    GridDocument {
        dim: space.dim(),
        num,
        special,
        t_modulus: space.t_modulus(),
        max: space.max(),
        spaces,
    }
}

/// Rebuild a space set from a document.
///
/// Shape (dim, T, max) comes from the document; the index kind and octree depth
/// from `config`. Rational tracking is enabled when the config asks for it or
/// the document carries families.
pub fn load(document: &GridDocument, config: &EngineConfig) -> Result<SpaceSet, PersistError> {
    let has_families = document
        .spaces
        .values()
        .flatten()
        .any(|r| r.rationals.is_some());
    let config = EngineConfig {
        dim: document.dim,
        t_modulus: document.t_modulus,
        max: document.max,
        track_rationals: config.track_rationals || has_families,
        ..config.clone()
    };
    config
        .validate()
        .map_err(|e| PersistError::InvalidHeader(e.to_string()))?;

    let mut space = SpaceSet::new(&config);
    let expected = space.grid_names();
    if let Some(missing) = expected.iter().find(|name| !document.spaces.contains_key(*name)) {
        return Err(PersistError::MissingSpace(missing.clone()));
    }
    if let Some(extra) = document.spaces.keys().find(|name| !expected.contains(*name)) {
        return Err(PersistError::UnexpectedSpace(extra.clone()));
    }

    for (name, records) in &document.spaces {
        let grid = space
            .grid_by_name_mut(name)
            .ok_or_else(|| PersistError::UnexpectedSpace(name.clone()))?;
        for record in records {
            restore(grid.as_mut(), record, document.dim).map_err(|reason| PersistError::InvalidCell {
                space: name.clone(),
                reason,
            })?;
        }
    }
    log::debug!(
        "loaded {} cells for dim={} max={}",
        document.spaces.values().map(Vec::len).sum::<usize>(),
        document.dim,
        document.max
    );
    Ok(space)
}

fn restore(grid: &mut dyn CellIndex, record: &CellRecord, dim: Dim) -> Result<(), String> {
    let digits = record.validate(dim)?;
    let cell = grid
        .get_or_create(point_from(&record.pos))
        .ok_or_else(|| format!("pos {:?} lies outside the grid", record.pos))?;
    if !cell.is_empty() {
        return Err(format!("pos {:?} appears twice", record.pos));
    }
    cell.set(record.count, record.time, &digits, record.rationals.as_deref());
    Ok(())
}

/// Write a document as pretty-printed JSON.
pub fn save_to_path(document: &GridDocument, path: &Path) -> Result<(), PersistError> {
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, document)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn load_from_path(path: &Path) -> Result<GridDocument, PersistError> {
    let file = fs::File::open(path)?;
    let document = serde_json::from_reader(BufReader::new(file))?;
    Ok(document)
}

impl TrajectoryAggregator {
    /// Document of the current grids, tagged with n and the special flag.
    pub fn save(&self) -> GridDocument {
        save(self.space(), self.n(), self.is_special())
    }

    /// Replace the grids with a document's contents. Nothing changes on failure.
    pub fn load(&mut self, document: &GridDocument) -> Result<(), PersistError> {
        let space = load(document, self.config())?;
        self.install(space, document.num, document.special);
        Ok(())
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), PersistError> {
        save_to_path(&self.save(), path)
    }

    pub fn load_from_path(&mut self, path: &Path) -> Result<(), PersistError> {
        let document = load_from_path(path)?;
        self.load(&document)
    }
}
