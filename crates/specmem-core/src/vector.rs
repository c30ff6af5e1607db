//! Shared vector helpers: BLOB (de)serialization and similarity.
//!
//! SQLite has no native vector column, so embeddings are stored as
//! little-endian `f32` BLOBs with a sibling `*_dim` integer column.

/// Encode a vector as a little-endian `f32` BLOB.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for x in vector {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Decode a little-endian `f32` BLOB back into a vector.
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`, or `0.0` if either vector is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for i in 0..len {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Euclidean distance. Kept alongside `cosine_distance` for callers that
/// care about magnitude rather than direction.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    (0..len).map(|i| (a[i] - b[i]).powi(2)).sum::<f32>().sqrt()
}

/// Cosine distance in `[0.0, 2.0]`: `1.0 - cosine_similarity`. Used by the
/// quadrant index and hybrid search, since embedding similarity is about
/// direction, not magnitude.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Component-wise mean of a set of vectors; empty input yields an empty vector.
pub fn centroid(vectors: &[Vec<f32>]) -> Vec<f32> {
    let Some(dim) = vectors.first().map(|v| v.len()) else {
        return Vec::new();
    };
    let mut sum = vec![0.0_f32; dim];
    for v in vectors {
        for (i, x) in v.iter().enumerate().take(dim) {
            sum[i] += x;
        }
    }
    let n = vectors.len().max(1) as f32;
    for x in sum.iter_mut() {
        *x /= n;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let v = vec![1.0, -2.5, 0.0, 3.25];
        assert_eq!(decode(&encode(&v)), v);
    }

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![0.5, 0.5, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn centroid_of_two_points_is_midpoint() {
        let c = centroid(&[vec![0.0, 0.0], vec![2.0, 4.0]]);
        assert_eq!(c, vec![1.0, 2.0]);
    }
}
