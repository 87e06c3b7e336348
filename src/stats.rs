use std::fmt;

use crate::space::CellQuery;

/// Aggregate figures of one grid.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    pub t: usize,
    /// Non-empty cells.
    pub occupied: usize,
    /// Sum of visit counts.
    pub total_count: u64,
    pub max_count: u64,
    /// Position of the first cell holding `max_count`.
    pub peak: Option<Vec<f64>>,
    /// Count-weighted mean of the cells' average timing.
    pub mean_time: f64,
    /// Next-digit histogram summed over every cell.
    pub next_digits: Vec<u64>,
}

impl fmt::Display for StepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:<4} cells={:<6} visits={:<8} max={:<6} mean_time={:.4} next_digits={:?}",
            self.t, self.occupied, self.total_count, self.max_count, self.mean_time, self.next_digits
        )?;
        if let Some(peak) = &self.peak {
            write!(f, " peak={peak:?}")?;
        }
        Ok(())
    }
}

/// Summarize the grid of time step `t` (or its accumulator).
pub fn summarize_step(query: &impl CellQuery, t: usize, accumulate: bool) -> StepSummary {
    let cells = query.get_cells(t, accumulate);
    let mut summary = StepSummary {
        t,
        occupied: cells.len(),
        total_count: 0,
        max_count: 0,
        peak: None,
        mean_time: 0.0,
        next_digits: Vec::new(),
    };

    let mut weighted_time = 0.0;
    for cell in &cells {
        summary.total_count += cell.count;
        weighted_time += cell.time * cell.count as f64;
        if cell.count > summary.max_count {
            summary.max_count = cell.count;
            summary.peak = Some(cell.pos.clone());
        }
        if summary.next_digits.len() < cell.next_digits.len() {
            summary.next_digits.resize(cell.next_digits.len(), 0);
        }
        for (total, v) in summary.next_digits.iter_mut().zip(&cell.next_digits) {
            *total += v;
        }
    }
    if summary.total_count > 0 {
        summary.mean_time = weighted_time / summary.total_count as f64;
    }
    summary
}

/// Summaries of every time step `0..=len`.
pub fn summarize(query: &impl CellQuery, accumulate: bool) -> Vec<StepSummary> {
    (0..=query.len())
        .map(|t| summarize_step(query, t, accumulate))
        .collect()
}
