pub mod hashed;
pub mod provider;

pub use hashed::HashedEmbedder;
pub use provider::{EmbeddingProvider, HttpEmbedder};

/// Cosine similarity in `[-1, 1]`. Zero-magnitude or mismatched vectors
/// score 0 rather than erroring; a degenerate embedding should never be
/// able to fail a read path.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

/// Cosine distance in `[0, 2]`, the convention the store reports and the
/// one the 0.65/0.95 thresholds are calibrated in.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// User-facing similarity in `[0, 1]`: `max(0, 1 - distance/2)`.
pub fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - distance / 2.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_distance_zero_and_similarity_one() {
        let v = vec![0.3_f32, 0.4, 0.5];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
        assert!((similarity_from_distance(cosine_distance(&v, &v)) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn opposite_vectors_map_to_similarity_zero() {
        let a = vec![1.0_f32, 0.0];
        let b = vec![-1.0_f32, 0.0];
        let d = cosine_distance(&a, &b);
        assert!((d - 2.0).abs() < 1e-6);
        assert_eq!(similarity_from_distance(d), 0.0);
    }

    #[test]
    fn orthogonal_vectors_land_at_half() {
        let a = vec![1.0_f32, 0.0];
        let b = vec![0.0_f32, 1.0];
        let sim = similarity_from_distance(cosine_distance(&a, &b));
        assert!((sim - 0.5).abs() < 1e-6);
    }

    #[test]
    fn degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
