//! Nearest-neighbour retrieval over committed code embeddings
//!
//! Cosine similarity against every stored vector; results sorted by score
//! descending with ties broken by lower code id.

use crate::codebook::Codebook;
use crate::types::{Candidate, SimilarityMatch};
use tracing::warn;

/// Cosine similarity of two equal-length vectors
///
/// Accumulates in f64. A zero-norm operand scores 0.0 (never NaN).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Top-K retrieval with a minimum score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityEngine {
    k: usize,
    threshold: f32,
}

impl SimilarityEngine {
    pub fn new(k: usize, threshold: f32) -> Self {
        Self { k, threshold }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn find_similar(&self, candidate: &Candidate, codebook: &Codebook) -> Vec<SimilarityMatch> {
        find_similar(candidate, codebook, self.k, self.threshold)
    }
}

/// Codes most similar to `candidate`, at most `k`, every score ≥ `threshold`
///
/// A candidate without an embedding always yields an empty result. Scores of
/// zero or below never match, so a zero threshold means "strictly positive".
pub fn find_similar(
    candidate: &Candidate,
    codebook: &Codebook,
    k: usize,
    threshold: f32,
) -> Vec<SimilarityMatch> {
    let Some(query) = candidate.embedding.as_deref() else {
        return Vec::new();
    };
    if k == 0 {
        return Vec::new();
    }

    let store = codebook.embedding_store();
    if query.len() != store.dimension() {
        warn!(
            candidate = %candidate.name,
            expected = store.dimension(),
            actual = query.len(),
            "Candidate embedding has wrong dimension, skipping similarity search"
        );
        return Vec::new();
    }

    let mut matches: Vec<SimilarityMatch> = store
        .all()
        .map(|(code_id, vector)| SimilarityMatch {
            code_id,
            score: cosine_similarity(query, vector),
        })
        .filter(|m| m.score >= threshold && m.score > 0.0)
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.code_id.cmp(&b.code_id))
    });
    matches.truncate(k);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::ResearchFramework;
    use crate::types::{CodeId, Evidence, Operation};

    fn candidate(embedding: Option<Vec<f32>>) -> Candidate {
        let functions = ResearchFramework::entman().function_set();
        Candidate {
            name: "Query".to_string(),
            function: functions.parse("PROBLEM_DEFINITION").unwrap(),
            evidence: vec![Evidence::new(1, "quote")],
            explanation: None,
            embedding,
        }
    }

    fn codebook_with(vectors: &[Vec<f32>]) -> Codebook {
        let functions = ResearchFramework::entman().function_set();
        let mut codebook = Codebook::new(2, functions);
        for (i, v) in vectors.iter().enumerate() {
            let mut c = candidate(Some(v.clone()));
            c.name = format!("Code {}", i + 1);
            codebook
                .apply(&Operation::CreateCode { candidate: c })
                .unwrap();
        }
        codebook
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_norm_scores_zero() {
        let score = cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]);
        assert_eq!(score, 0.0);
        assert!(!score.is_nan());
    }

    #[test]
    fn test_no_embedding_returns_empty() {
        let codebook = codebook_with(&[vec![1.0, 0.0]]);
        assert!(find_similar(&candidate(None), &codebook, 5, 0.0).is_empty());
    }

    #[test]
    fn test_ranking_and_tie_break_by_lower_id() {
        // Codes 1 and 3 are identical, code 2 is less similar
        let codebook = codebook_with(&[vec![1.0, 0.0], vec![0.6, 0.8], vec![1.0, 0.0]]);
        let matches = find_similar(&candidate(Some(vec![1.0, 0.0])), &codebook, 5, 0.5);

        let ids: Vec<CodeId> = matches.iter().map(|m| m.code_id).collect();
        assert_eq!(ids, vec![CodeId(1), CodeId(3), CodeId(2)]);

        // Repeated calls give the same order
        assert_eq!(
            find_similar(&candidate(Some(vec![1.0, 0.0])), &codebook, 5, 0.5),
            matches
        );
    }

    #[test]
    fn test_threshold_and_k() {
        let codebook = codebook_with(&[vec![1.0, 0.0], vec![0.6, 0.8], vec![0.0, 1.0]]);
        let query = candidate(Some(vec![1.0, 0.0]));

        let matches = find_similar(&query, &codebook, 5, 0.7);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].code_id, CodeId(1));

        let matches = find_similar(&query, &codebook, 1, 0.0);
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn test_zero_threshold_excludes_orthogonal_codes() {
        let codebook = codebook_with(&[vec![0.0, 1.0], vec![-1.0, 0.0], vec![0.6, 0.8]]);
        let matches = SimilarityEngine::new(5, 0.0)
            .find_similar(&candidate(Some(vec![1.0, 0.0])), &codebook);

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].code_id, CodeId(3));
        assert!(matches.iter().all(|m| m.score > 0.0));
    }
}
