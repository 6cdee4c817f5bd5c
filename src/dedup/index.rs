use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Kept vectors above this count switch from exact flat scan to LSH-bucketed
/// candidate search. Below it a linear scan is both exact and fast enough.
const FLAT_SCAN_LIMIT: usize = 1024;

/// Signature bits per hash table.
const LSH_BITS: usize = 12;

/// Number of independent hash tables. More tables cut the miss probability
/// for genuinely near pairs at the cost of a larger candidate union.
const LSH_TABLES: usize = 8;

/// Fixed seed so hyperplanes, and therefore dedup output, are reproducible
/// across runs.
const LSH_SEED: u64 = 0x5eed_0ded;

/// Cosine distance over unit-normalized vectors, bounded to [0, 2].
/// Distances within float noise of zero snap to exactly zero so a
/// threshold of 0 still catches identical vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let distance = (1.0 - dot).clamp(0.0, 2.0);
    if distance < 1e-6 {
        0.0
    } else {
        distance
    }
}

/// Nearest-neighbor index over the vectors of records kept so far. Grows
/// incrementally; holds one representative per duplicate cluster by
/// construction (rejected vectors are never inserted). Exact below
/// `FLAT_SCAN_LIMIT`, random-hyperplane LSH with exact verification above.
pub struct SimilarityIndex {
    vectors: Vec<Vec<f32>>,
    lsh: Option<LshTables>,
}

struct LshTables {
    // planes[t][b] is the b-th hyperplane of table t
    planes: Vec<Vec<Vec<f32>>>,
    buckets: Vec<HashMap<u64, Vec<usize>>>,
}

impl LshTables {
    fn new(dimensions: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(LSH_SEED);
        let planes = (0..LSH_TABLES)
            .map(|_| {
                (0..LSH_BITS)
                    .map(|_| (0..dimensions).map(|_| rng.gen::<f32>() - 0.5).collect())
                    .collect()
            })
            .collect();
        Self {
            planes,
            buckets: vec![HashMap::new(); LSH_TABLES],
        }
    }

    fn signature(&self, table: usize, vector: &[f32]) -> u64 {
        let mut sig = 0u64;
        for (bit, plane) in self.planes[table].iter().enumerate() {
            let dot: f32 = plane.iter().zip(vector).map(|(p, v)| p * v).sum();
            if dot >= 0.0 {
                sig |= 1 << bit;
            }
        }
        sig
    }

    fn insert(&mut self, id: usize, vector: &[f32]) {
        for table in 0..LSH_TABLES {
            let sig = self.signature(table, vector);
            self.buckets[table].entry(sig).or_default().push(id);
        }
    }

    /// Union of bucket members across all tables; may be empty when no kept
    /// vector shares a signature with the query.
    fn candidates(&self, vector: &[f32]) -> Vec<usize> {
        let mut seen: Vec<usize> = Vec::new();
        for table in 0..LSH_TABLES {
            let sig = self.signature(table, vector);
            if let Some(ids) = self.buckets[table].get(&sig) {
                for &id in ids {
                    if !seen.contains(&id) {
                        seen.push(id);
                    }
                }
            }
        }
        seen
    }
}

impl SimilarityIndex {
    pub fn new() -> Self {
        Self {
            vectors: Vec::new(),
            lsh: None,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Inserts a kept vector and returns its id.
    pub fn insert(&mut self, vector: Vec<f32>) -> usize {
        debug_assert!(
            self.vectors.is_empty() || self.vectors[0].len() == vector.len(),
            "all vectors in one index share a dimensionality"
        );
        let id = self.vectors.len();
        if let Some(lsh) = &mut self.lsh {
            lsh.insert(id, &vector);
        }
        self.vectors.push(vector);
        if self.lsh.is_none() && self.vectors.len() > FLAT_SCAN_LIMIT {
            self.build_lsh();
        }
        id
    }

    fn build_lsh(&mut self) {
        debug!(kept = self.vectors.len(), "switching similarity index to LSH");
        let mut lsh = LshTables::new(self.vectors[0].len());
        for (id, vector) in self.vectors.iter().enumerate() {
            lsh.insert(id, vector);
        }
        self.lsh = Some(lsh);
    }

    /// Returns the id and cosine distance of the closest kept vector, or
    /// `None` when the index is empty.
    pub fn nearest(&self, query: &[f32]) -> Option<(usize, f32)> {
        if self.vectors.is_empty() {
            return None;
        }
        match &self.lsh {
            None => self.scan(0..self.vectors.len(), query),
            Some(lsh) => {
                let candidates = lsh.candidates(query);
                if candidates.is_empty() {
                    // No shared bucket anywhere: verify exhaustively rather
                    // than miss a near pair the hashes happened to split.
                    self.scan(0..self.vectors.len(), query)
                } else {
                    self.scan(candidates.into_iter(), query)
                }
            }
        }
    }

    fn scan(&self, ids: impl Iterator<Item = usize>, query: &[f32]) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for id in ids {
            let distance = cosine_distance(&self.vectors[id], query);
            match best {
                Some((_, d)) if d <= distance => {}
                _ => best = Some((id, distance)),
            }
        }
        best
    }
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(xs: &[f32]) -> Vec<f32> {
        let norm: f32 = xs.iter().map(|x| x * x).sum::<f32>().sqrt();
        xs.iter().map(|x| x / norm).collect()
    }

    #[test]
    fn empty_index_has_no_nearest() {
        let index = SimilarityIndex::new();
        assert!(index.nearest(&[1.0, 0.0]).is_none());
    }

    #[test]
    fn nearest_returns_closest_kept_vector() {
        let mut index = SimilarityIndex::new();
        index.insert(unit(&[1.0, 0.0]));
        index.insert(unit(&[0.0, 1.0]));
        let (id, distance) = index.nearest(&unit(&[0.9, 0.1])).unwrap();
        assert_eq!(id, 0);
        assert!(distance < 0.1);
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let v = unit(&[0.3, 0.4, 0.5]);
        assert!(cosine_distance(&v, &v) < 1e-6);
    }

    #[test]
    fn opposite_vectors_have_max_distance() {
        let v = unit(&[1.0, 0.0]);
        let w = unit(&[-1.0, 0.0]);
        assert!((cosine_distance(&v, &w) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn lsh_regime_agrees_with_flat_scan_on_exact_match() {
        // Push the index past the flat-scan limit, then query a vector we
        // know is present; LSH must still find it at distance ~0.
        let mut index = SimilarityIndex::new();
        let mut rng = StdRng::seed_from_u64(42);
        let mut probe = Vec::new();
        for i in 0..(FLAT_SCAN_LIMIT + 10) {
            let v: Vec<f32> = (0..16).map(|_| rng.gen::<f32>() - 0.5).collect();
            let v = unit(&v);
            if i == 100 {
                probe = v.clone();
            }
            index.insert(v);
        }
        let (_, distance) = index.nearest(&probe).unwrap();
        assert!(distance < 1e-5);
    }
}
