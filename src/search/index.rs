//! Brute-force cosine similarity index.

use super::Embedding;

/// Scale a vector to unit L2 norm in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity in [-1, 1]. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Catalog vectors aligned with catalog positions.
///
/// A slot is `None` when the product has no vector (e.g. its image file
/// is missing); such products never appear in results.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    vectors: Vec<Option<Embedding>>,
}

impl VectorIndex {
    /// Build an index; every present vector is normalized.
    pub fn new(vectors: Vec<Option<Embedding>>) -> Self {
        let vectors = vectors
            .into_iter()
            .map(|v| {
                v.map(|mut v| {
                    l2_normalize(&mut v);
                    v
                })
            })
            .collect();
        Self { vectors }
    }

    /// Number of slots (catalog size).
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Number of slots holding a vector.
    pub fn indexed_count(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_some()).count()
    }

    /// Rank candidate positions by cosine similarity to `query`.
    ///
    /// Returns at most `k` `(position, score)` pairs, scores non-increasing.
    /// Ties keep catalog order.
    pub fn top_k<I>(&self, query: &[f32], candidates: I, k: usize) -> Vec<(usize, f32)>
    where
        I: IntoIterator<Item = usize>,
    {
        if k == 0 {
            return Vec::new();
        }
        let mut query = query.to_vec();
        l2_normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = candidates
            .into_iter()
            .filter_map(|idx| {
                let vector = self.vectors.get(idx)?.as_ref()?;
                if vector.len() != query.len() {
                    return None;
                }
                let dot: f32 = vector.iter().zip(&query).map(|(a, b)| a * b).sum();
                Some((idx, dot.clamp(-1.0, 1.0)))
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }

    /// Rank every indexed position.
    pub fn top_k_all(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        self.top_k(query, 0..self.vectors.len(), k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> VectorIndex {
        VectorIndex::new(vec![
            Some(vec![1.0, 0.0]),
            Some(vec![0.0, 1.0]),
            None,
            Some(vec![3.0, 3.0]),
            Some(vec![-1.0, 0.0]),
        ])
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_top_k_is_sorted_and_bounded() {
        let hits = index().top_k_all(&[1.0, 0.2], 3);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 3);
        for pair in hits.windows(2) {
            assert!(pair[0].1 >= pair[1].1, "Scores must be non-increasing");
        }
    }

    #[test]
    fn test_missing_vectors_and_wrong_dims_are_skipped() {
        let idx = index();
        assert_eq!(idx.indexed_count(), 4);
        assert!(idx.top_k(&[1.0, 0.0], [2usize], 5).is_empty());
        assert!(idx.top_k_all(&[1.0, 0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_top_k_respects_candidates() {
        let hits = index().top_k(&[1.0, 0.0], vec![1, 4], 10);
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![1, 4]);
    }

    #[test]
    fn test_zero_k_returns_nothing() {
        assert!(index().top_k_all(&[1.0, 0.0], 0).is_empty());
    }
}
