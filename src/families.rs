use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Width of the m range covered by one bucket.
pub const BUCKET_SIZE: u64 = 100_000;

/// Rationals whose digit cycles are rotations of one another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RationalFamily {
    /// Numerators seen so far, in first-visit order.
    #[serde(rename = "m")]
    pub members: Vec<u64>,
    /// Digit cycle of the first member.
    pub digits: String,
    pub count: u64,
    /// Timing metric recorded when the family was created.
    pub time: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Bucket {
    families: Vec<RationalFamily>,
    /// Remainder → family slot.
    index: HashMap<u64, usize>,
}

impl Bucket {
    fn add(&mut self, m: u64, remainders: &[u64], digits: &str, time: u64) {
        match self.index.get(&m) {
            None => {
                let slot = self.families.len();
                self.families.push(RationalFamily {
                    members: vec![m],
                    digits: digits.to_string(),
                    count: 1,
                    time,
                });
                self.index.insert(m, slot);
                for &r in remainders {
                    self.index.insert(r, slot);
                }
            }
            Some(&slot) => {
                let family = &mut self.families[slot];
                if !family.members.contains(&m) {
                    family.members.push(m);
                    family.count += 1;
                }
            }
        }
    }

    /// Remainders pointing at `slot`, sorted.
    fn keys_of(&self, slot: usize) -> Vec<u64> {
        let mut keys: Vec<u64> = self
            .index
            .iter()
            .filter(|&(_, &s)| s == slot)
            .map(|(&r, _)| r)
            .collect();
        keys.sort_unstable();
        keys
    }
}

/// Per-cell registry of the rationals that visited it.
///
/// Numerators are split into buckets of [`BUCKET_SIZE`]; within a bucket a
/// rational joins the family of any earlier rational whose long-division
/// remainders contain it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RationalFamilies {
    buckets: BTreeMap<u64, Bucket>,
}

impl RationalFamilies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a visit of m/n, given its cycle remainders and digit path.
    pub fn add(&mut self, m: u64, remainders: &[u64], digits: &str, time: u64) {
        self.buckets
            .entry(m / BUCKET_SIZE)
            .or_default()
            .add(m, remainders, digits, time);
    }

    /// Rebuild from persisted families by replaying every member.
    pub fn from_families(families: &[RationalFamily]) -> Self {
        let mut out = Self::new();
        for family in families {
            for &m in &family.members {
                out.add(m, &family.members, &family.digits, family.time);
            }
        }
        out
    }

    /// Union with another registry, matching families through shared remainders.
    pub fn merge(&mut self, other: &RationalFamilies) {
        for (&key, bucket) in &other.buckets {
            let target = self.buckets.entry(key).or_default();
            for (slot, family) in bucket.families.iter().enumerate() {
                let keys = bucket.keys_of(slot);
                for &m in &family.members {
                    target.add(m, &keys, &family.digits, family.time);
                }
            }
        }
    }

    /// All families, bucket by bucket.
    pub fn families(&self) -> Vec<RationalFamily> {
        self.buckets
            .values()
            .flat_map(|b| b.families.iter().cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|b| b.families.is_empty())
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
