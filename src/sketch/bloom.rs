//! Bloom filters keyed by network vertex.
//!
//! Membership checks may report false positives but never false negatives.
//! Index positions use double hashing over two xxh3 hashes.

use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use xxhash_rust::xxh3::{xxh3_64, xxh3_64_with_seed};

/// Default filter width in bits.
pub const DEFAULT_BITS: usize = 1 << 14;

/// Default number of hash functions.
pub const DEFAULT_HASHES: u32 = 7;

const SECOND_HASH_SEED: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: usize,
    num_hashes: u32,
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new(DEFAULT_BITS, DEFAULT_HASHES)
    }
}

impl BloomFilter {
    pub fn new(num_bits: usize, num_hashes: u32) -> Self {
        let num_bits = num_bits.max(64);
        Self {
            bits: vec![0; num_bits.div_ceil(64)],
            num_bits,
            num_hashes: num_hashes.max(1),
        }
    }

    /// Size a filter for `expected` items at false-positive rate `fpr`.
    pub fn with_rate(expected: usize, fpr: f64) -> Self {
        let n = expected.max(1) as f64;
        let p = fpr.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil() as usize;
        let k = ((m as f64 / n) * ln2).round() as u32;
        Self::new(m, k)
    }

    fn positions<'a>(&'a self, item: &'a str) -> impl Iterator<Item = usize> + 'a {
        let h1 = xxh3_64(item.as_bytes());
        let h2 = xxh3_64_with_seed(item.as_bytes(), SECOND_HASH_SEED) | 1;
        let m = self.num_bits as u64;
        (0..self.num_hashes as u64).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % m) as usize)
    }

    pub fn insert(&mut self, item: &str) {
        let positions: Vec<usize> = self.positions(item).collect();
        for pos in positions {
            self.bits[pos / 64] |= 1 << (pos % 64);
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        self.positions(item)
            .all(|pos| self.bits[pos / 64] & (1 << (pos % 64)) != 0)
    }

    /// OR another filter's bits into this one.
    pub fn union_with(&mut self, other: &BloomFilter) -> Result<()> {
        if self.num_bits != other.num_bits || self.num_hashes != other.num_hashes {
            return Err(KernelError::Protocol(format!(
                "bloom filter shape mismatch: {}x{} vs {}x{}",
                self.num_bits, self.num_hashes, other.num_bits, other.num_hashes
            )));
        }
        for (mine, theirs) in self.bits.iter_mut().zip(&other.bits) {
            *mine |= *theirs;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }
}

/// A bloom filter per network vertex, keyed by the vertex's sketch key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixFilter {
    filters: HashMap<String, BloomFilter>,
}

impl MatrixFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `item` into the filter for `key`, creating it if needed.
    pub fn add(&mut self, key: &str, item: &str) {
        self.filters.entry(key.to_string()).or_default().insert(item);
    }

    pub fn insert(&mut self, key: impl Into<String>, filter: BloomFilter) {
        self.filters.insert(key.into(), filter);
    }

    pub fn get(&self, key: &str) -> Option<&BloomFilter> {
        self.filters.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.filters.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BloomFilter)> {
        self.filters.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Every filter OR'd together. `None` when the matrix is empty.
    pub fn all_filters(&self) -> Option<BloomFilter> {
        let mut iter = self.filters.values();
        let mut result = iter.next()?.clone();
        for filter in iter {
            if let Err(e) = result.union_with(filter) {
                tracing::warn!("Skipping filter in aggregate: {}", e);
            }
        }
        Some(result)
    }
}
