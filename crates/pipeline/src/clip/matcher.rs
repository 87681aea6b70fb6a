//! Approximate nearest-neighbour matching of binary descriptors.
//!
//! Descriptors of the indexed image are hashed into several tables keyed by
//! random bit subsets. A query visits its own bucket plus every bucket one
//! bit flip away in each table, then ranks the candidates by Hamming
//! distance.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::features::{Descriptor, DESCRIPTOR_WORDS};

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    pub tables: usize,
    pub key_bits: usize,
    /// Visit buckets whose key differs in up to this many bits (0 or 1).
    pub flip_radius: usize,
    /// Lowe ratio: accept only if best < ratio * second best.
    pub ratio: f32,
    pub seed: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            tables: 6,
            key_bits: 12,
            flip_radius: 1,
            ratio: 0.75,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

struct HashTable {
    bits: Vec<usize>,
    buckets: HashMap<u32, Vec<usize>>,
}

impl HashTable {
    fn key(&self, d: &Descriptor) -> u32 {
        self.bits
            .iter()
            .enumerate()
            .fold(0u32, |key, (k, &bit)| key | ((d.bit(bit) as u32) << k))
    }
}

pub struct LshIndex<'a> {
    train: &'a [Descriptor],
    tables: Vec<HashTable>,
    flip_radius: usize,
}

impl<'a> LshIndex<'a> {
    pub fn build(train: &'a [Descriptor], config: &MatcherConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let total_bits = DESCRIPTOR_WORDS * 64;
        let tables = (0..config.tables)
            .map(|_| {
                let bits = rand::seq::index::sample(&mut rng, total_bits, config.key_bits).into_vec();
                let mut table = HashTable {
                    bits,
                    buckets: HashMap::new(),
                };
                for (i, d) in train.iter().enumerate() {
                    let key = table.key(d);
                    table.buckets.entry(key).or_default().push(i);
                }
                table
            })
            .collect();
        Self {
            train,
            tables,
            flip_radius: config.flip_radius.min(1),
        }
    }

    fn candidates(&self, query: &Descriptor) -> HashSet<usize> {
        let mut found = HashSet::new();
        for table in &self.tables {
            let key = table.key(query);
            let mut visit = |k: u32| {
                if let Some(bucket) = table.buckets.get(&k) {
                    found.extend(bucket.iter().copied());
                }
            };
            visit(key);
            if self.flip_radius >= 1 {
                for b in 0..table.bits.len() {
                    visit(key ^ (1 << b));
                }
            }
        }
        found
    }

    /// The two nearest indexed descriptors, closest first.
    pub fn knn2(&self, query: &Descriptor) -> Option<[(usize, u32); 2]> {
        let mut best = (usize::MAX, u32::MAX);
        let mut second = (usize::MAX, u32::MAX);
        let candidates = self.candidates(query);
        if candidates.len() < 2 {
            return None;
        }
        for i in candidates {
            let d = self.train[i].hamming(query);
            // Equal distances resolve to the lower index.
            if d < best.1 || (d == best.1 && i < best.0) {
                second = best;
                best = (i, d);
            } else if d < second.1 || (d == second.1 && i < second.0) {
                second = (i, d);
            }
        }
        Some([best, second])
    }
}

/// Match each query descriptor against the index, keeping matches that
/// pass the ratio test. Queries with fewer than two candidates are skipped.
pub fn match_descriptors(query: &[Descriptor], train: &[Descriptor], config: &MatcherConfig) -> Vec<Match> {
    if train.len() < 2 {
        return Vec::new();
    }
    let index = LshIndex::build(train, config);
    query
        .iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            let [(train_idx, d1), (_, d2)] = index.knn2(q)?;
            ((d1 as f32) < config.ratio * d2 as f32).then_some(Match {
                query: qi,
                train: train_idx,
                distance: d1,
            })
        })
        .collect()
}
