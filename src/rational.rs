use crate::cell::Point;
use crate::config::Dim;
use crate::error::TrajectoryError;

/// Length of a unit step along one axis.
pub const C: f64 = 0.5;

/// The walk of one rational m/n under base-`2^dim` long division.
///
/// Everything is precomputed for a single period, so position, digit and
/// timing queries at arbitrary `t` are O(1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RationalTrajectory {
    m: u64,
    n: u64,
    dim: Dim,
    digits: Vec<u8>,
    remainders: Vec<u64>,
    /// Cumulative positions in half-step units, indexed `0..=period`.
    positions: Vec<[i64; 3]>,
    /// Cumulative digit changes, indexed `0..=period`.
    transitions: Vec<u64>,
}

impl RationalTrajectory {
    pub fn new(m: u64, n: u64, dim: Dim) -> Result<Self, TrajectoryError> {
        let (digits, remainders) = long_division(m, n, dim)?;
        let period = digits.len();

        let mut positions = Vec::with_capacity(period + 1);
        let mut current = [0i64; 3];
        positions.push(current);
        for &digit in &digits {
            let step = half_step(digit, dim);
            for (axis, delta) in step.iter().enumerate() {
                current[axis] += delta;
            }
            positions.push(current);
        }

        let mut transitions = Vec::with_capacity(period + 1);
        let mut changes = 0u64;
        transitions.push(0);
        for i in 0..period {
            if digits[i] != digits[(i + 1) % period] {
                changes += 1;
            }
            transitions.push(changes);
        }

        Ok(Self {
            m,
            n,
            dim,
            digits,
            remainders,
            positions,
            transitions,
        })
    }

    pub fn m(&self) -> u64 {
        self.m
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn dim(&self) -> Dim {
        self.dim
    }

    /// The repeating digit cycle.
    pub fn digits(&self) -> &[u8] {
        &self.digits
    }

    /// Long-division remainders of the cycle, one per digit, starting at `m`.
    pub fn remainders(&self) -> &[u64] {
        &self.remainders
    }

    /// Remainder carried into step `t`; the numerator of the rotation reached at `t`.
    pub fn remainder(&self, t: usize) -> u64 {
        self.remainders[t % self.period()]
    }

    pub fn period(&self) -> usize {
        self.digits.len()
    }

    /// Digit consumed at step `t`.
    pub fn digit(&self, t: usize) -> u8 {
        self.digits[t % self.period()]
    }

    /// Position after `t` steps, in half-step units.
    pub fn position_half(&self, t: usize) -> [i64; 3] {
        let period = self.period();
        let laps = (t / period) as i64;
        let drift = self.positions[period];
        let rest = self.positions[t % period];
        [
            laps * drift[0] + rest[0],
            laps * drift[1] + rest[1],
            laps * drift[2] + rest[2],
        ]
    }

    /// Position after `t` steps. Unused axes stay at 0.
    pub fn position(&self, t: usize) -> Point {
        let half = self.position_half(t);
        [half[0] as f64 * C, half[1] as f64 * C, half[2] as f64 * C]
    }

    /// Net displacement over one period.
    pub fn drift(&self) -> Point {
        self.position(self.period())
    }

    /// Number of digit changes between consecutive steps in `[0, t)`.
    pub fn timing(&self, t: usize) -> u64 {
        let period = self.period();
        (t / period) as u64 * self.transitions[period] + self.transitions[t % period]
    }

    /// Digit cycle as a string, e.g. `"001"` for 1/7 in base 2.
    pub fn path(&self) -> String {
        self.digits.iter().map(|d| char::from(b'0' + d)).collect()
    }
}

/// Digit cycle and period of m/n in base `2^dim`.
pub fn digits_and_period(m: u64, n: u64, dim: Dim) -> Result<(Vec<u8>, usize), TrajectoryError> {
    let (digits, _) = long_division(m, n, dim)?;
    let period = digits.len();
    Ok((digits, period))
}

/// Step of one digit in half-step units: bit `k` clear moves axis `k` up, set moves it down.
fn half_step(digit: u8, dim: Dim) -> [i64; 3] {
    let mut step = [0i64; 3];
    for (axis, slot) in step.iter_mut().enumerate().take(dim.axes()) {
        *slot = if (digit >> axis) & 1 == 0 { 1 } else { -1 };
    }
    step
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Run long division of m by n until the remainder returns to m.
fn long_division(m: u64, n: u64, dim: Dim) -> Result<(Vec<u8>, Vec<u64>), TrajectoryError> {
    if n == 0 {
        return Err(TrajectoryError::ZeroDenominator);
    }
    if m > n {
        return Err(TrajectoryError::NumeratorOutOfRange { m, n });
    }
    let base = dim.base();
    if m == 0 {
        return Ok((vec![0], vec![0]));
    }
    if m == n {
        return Ok((vec![(base - 1) as u8], vec![m]));
    }

    let no_cycle = TrajectoryError::NoCycle { m, n, dim: dim.into() };

    // The remainder can only come back to m when n / gcd(m, n) is odd.
    let reduced = n / gcd(m, n);
    if reduced % 2 == 0 {
        return Err(no_cycle);
    }

    let wide_n = u128::from(n);
    let wide_base = u128::from(base);
    let mut digits = Vec::new();
    let mut remainders = Vec::new();
    let mut remainder = m;

    // At most `reduced` distinct remainders can appear before the cycle closes.
    for _ in 0..reduced {
        let scaled = u128::from(remainder) * wide_base;
        digits.push((scaled / wide_n) as u8);
        remainders.push(remainder);
        remainder = (scaled % wide_n) as u64;
        if remainder == m {
            return Ok((digits, remainders));
        }
    }
    Err(no_cycle)
}
