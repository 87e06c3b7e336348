use crate::config::Dim;
use crate::error::CatalogError;

/// A candidate denominator for cycle modulus T.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denominator {
    pub n: u64,
    /// Prime factorization as (prime, exponent) pairs.
    pub factors: Vec<(u64, u32)>,
    /// Multiplicative order of the base modulo `n`.
    pub period: u64,
    pub prime: bool,
    pub special: bool,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Prime factorization by trial division.
pub fn prime_factors(mut n: u64) -> Vec<(u64, u32)> {
    let mut out = Vec::new();
    let mut p = 2u64;
    while n > 1 && p.saturating_mul(p) <= n {
        if n % p == 0 {
            let mut e = 0;
            while n % p == 0 {
                n /= p;
                e += 1;
            }
            out.push((p, e));
        }
        p += if p == 2 { 1 } else { 2 };
    }
    if n > 1 {
        out.push((n, 1));
    }
    out
}

pub fn is_prime(n: u64) -> bool {
    n >= 2 && prime_factors(n) == [(n, 1)]
}

/// Every divisor of `n`, ascending.
pub fn divisors(n: u64) -> Vec<u64> {
    if n == 0 {
        return Vec::new();
    }
    let mut out = vec![1u64];
    for (p, e) in prime_factors(n) {
        let len = out.len();
        let mut power = 1u64;
        for _ in 0..e {
            power *= p;
            for i in 0..len {
                out.push(out[i] * power);
            }
        }
    }
    out.sort_unstable();
    out
}

/// Smallest k ≥ 1 with `base^k ≡ 1 (mod n)`; `None` when base and n share a factor.
pub fn multiplicative_order(base: u64, n: u64) -> Option<u64> {
    if n == 0 || gcd(base, n) != 1 {
        return None;
    }
    if n == 1 {
        return Some(1);
    }
    let modulus = u128::from(n);
    let step = u128::from(base) % modulus;
    let mut value = step;
    let mut k = 1u64;
    while value != 1 {
        value = value * step % modulus;
        k += 1;
    }
    Some(k)
}

/// `base^t_modulus - 1` for the dimension's base.
pub fn cycle_modulus(dim: Dim, t_modulus: u32) -> Result<u64, CatalogError> {
    if t_modulus == 0 {
        return Err(CatalogError::ZeroPeriod);
    }
    let base = dim.base();
    base.checked_pow(t_modulus)
        .map(|v| v - 1)
        .ok_or(CatalogError::Overflow {
            base,
            period: t_modulus,
        })
}

/// Whether `x`, whose period under the base is `period`, is special for T.
fn special_for(t_modulus: u32, dim: Dim, x: u64, period: u64) -> bool {
    if period != u64::from(t_modulus) {
        return false;
    }
    if t_modulus % 2 == 0 {
        match dim.base().checked_pow(t_modulus / 2) {
            Some(half) => half
                .checked_add(1)
                .map_or(false, |bound| bound % x == 0),
            None => false,
        }
    } else {
        1u64.checked_shl(t_modulus).map_or(false, |p| p - 1 == x)
    }
}

/// Whether `n` is a special denominator for cycle modulus T in `dim`.
pub fn is_special(dim: Dim, t_modulus: u32, n: u64) -> bool {
    match multiplicative_order(dim.base(), n) {
        Some(period) => special_for(t_modulus, dim, n, period),
        None => false,
    }
}

/// Every divisor of `base^T - 1` with its period and special flag.
pub fn catalog(dim: Dim, t_modulus: u32) -> Result<Vec<Denominator>, CatalogError> {
    let modulus = cycle_modulus(dim, t_modulus)?;
    let base = dim.base();
    let out: Vec<Denominator> = divisors(modulus)
        .into_iter()
        .filter_map(|n| {
            let period = multiplicative_order(base, n)?;
            Some(Denominator {
                n,
                factors: prime_factors(n),
                period,
                prime: is_prime(n),
                special: special_for(t_modulus, dim, n, period),
            })
        })
        .collect();
    log::debug!(
        "catalog dim={dim} T={t_modulus}: {} divisors of {modulus}, {} special",
        out.len(),
        out.iter().filter(|d| d.special).count()
    );
    Ok(out)
}
