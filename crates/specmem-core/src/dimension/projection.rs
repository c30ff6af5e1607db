//! Deterministic projection between embedding dimensions
//!
//! Expansion (`m < n`) multiplies by a seeded Gaussian random-projection
//! matrix and L2-normalizes; contraction (`m > n`) averages contiguous
//! coordinate buckets and L2-normalizes. Both are pure functions of
//! `(m, n, input)` so they satisfy the determinism property in spec section 8.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use sha2::{Digest, Sha256};

const SEED_PREFIX: &str = "specmem-projection-v1";

fn seed_for(m: usize, n: usize) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SEED_PREFIX.as_bytes());
    hasher.update(b":");
    hasher.update(m.to_le_bytes());
    hasher.update(b":");
    hasher.update(n.to_le_bytes());
    hasher.finalize().into()
}

/// A deterministic `m x n` Gaussian random-projection matrix.
#[derive(Debug, Clone)]
pub struct ProjectionMatrix {
    m: usize,
    n: usize,
    /// Row-major, `m` rows of `n` entries each.
    entries: Vec<f32>,
}

impl ProjectionMatrix {
    /// Build the deterministic matrix for projecting from `m` to `n`
    /// dimensions. Entries are Gaussian with scale `sqrt(1/n)`, seeded by
    /// the concatenation of a fixed string with `m` and `n`.
    pub fn deterministic(m: usize, n: usize) -> Self {
        let mut rng = ChaCha8Rng::from_seed(seed_for(m, n));
        let scale = (1.0_f64 / n.max(1) as f64).sqrt();
        let normal = Normal::new(0.0, scale).expect("scale is always positive");
        let entries: Vec<f32> = (0..m * n)
            .map(|_| normal.sample(&mut rng) as f32)
            .collect();
        Self { m, n, entries }
    }

    /// Project an `m`-length vector to `n` dimensions and L2-normalize the
    /// result. Returns the input unchanged (after normalizing) if its
    /// length doesn't match `m`... callers should not rely on that and
    /// should always size inputs to `m`.
    pub fn expand(&self, vector: &[f32]) -> Vec<f32> {
        debug_assert_eq!(vector.len(), self.m);
        let mut out = vec![0.0_f32; self.n];
        for (i, &x) in vector.iter().enumerate() {
            if i >= self.m {
                break;
            }
            let row = &self.entries[i * self.n..(i + 1) * self.n];
            for (j, &w) in row.iter().enumerate() {
                out[j] += x * w;
            }
        }
        l2_normalize(&mut out);
        out
    }
}

/// Average contiguous coordinate buckets of `vector` down to `target`
/// dimensions, then L2-normalize.
pub fn contract(vector: &[f32], target: usize) -> Vec<f32> {
    if target == 0 || vector.is_empty() {
        return vec![0.0; target];
    }
    let m = vector.len();
    let bucket = (m as f64 / target as f64).round().max(1.0) as usize;
    let mut out = Vec::with_capacity(target);
    for j in 0..target {
        let start = j * bucket;
        if start >= m {
            out.push(0.0);
            continue;
        }
        let end = ((j + 1) * bucket).min(m);
        let slice = &vector[start..end];
        let avg = slice.iter().sum::<f32>() / slice.len().max(1) as f32;
        out.push(avg);
    }
    l2_normalize(&mut out);
    out
}

/// Project `vector` (of any length) onto `target` dimensions using
/// expansion or contraction as appropriate, returning the input unchanged
/// when the lengths already match.
pub fn project(vector: &[f32], target: usize) -> Vec<f32> {
    let m = vector.len();
    if m == target {
        return vector.to_vec();
    }
    if m < target {
        ProjectionMatrix::deterministic(m, target).expand(vector)
    } else {
        contract(vector, target)
    }
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_lengths_match() {
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(project(&v, 3), v);
    }

    #[test]
    fn expansion_is_l2_normal() {
        let v = vec![0.3, -0.4, 0.1, 0.9];
        let out = project(&v, 16);
        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3, "norm was {norm}");
    }

    #[test]
    fn contraction_is_l2_normal() {
        let v: Vec<f32> = (0..768).map(|i| (i as f32).sin()).collect();
        let out = project(&v, 64);
        assert_eq!(out.len(), 64);
        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3, "norm was {norm}");
    }

    #[test]
    fn deterministic_across_calls() {
        let v: Vec<f32> = (0..100).map(|i| i as f32 * 0.01).collect();
        let a = project(&v, 256);
        let b = project(&v, 256);
        assert_eq!(a, b);
    }

    #[test]
    fn deterministic_matrix_is_stable() {
        let m1 = ProjectionMatrix::deterministic(10, 20);
        let m2 = ProjectionMatrix::deterministic(10, 20);
        assert_eq!(m1.entries, m2.entries);
    }

    #[test]
    fn contraction_bucket_averages() {
        let v = vec![1.0, 1.0, 3.0, 3.0];
        let out = contract(&v, 2);
        // before normalization: [1.0, 3.0]; normalized should preserve the 1:3 ratio
        assert!(out[1] > out[0]);
    }
}
