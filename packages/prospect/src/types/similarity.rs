//! Similarity relationship types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::company::{Company, CompanyId};

/// Where a similarity candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrigin {
    /// Nearest neighbor from the vector index.
    VectorSearch,

    /// Suggested by the LLM from the target's profile.
    LlmSuggestion,

    /// Discovered through the external search registry.
    WebSearch,
}

/// Per-method validation scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodScores {
    pub structured: Option<f32>,
    pub embedding: Option<f32>,
    pub llm_judge: Option<f32>,
}

impl MethodScores {
    /// How many methods scored at or above the threshold.
    pub fn votes_at_or_above(&self, threshold: f32) -> usize {
        [self.structured, self.embedding, self.llm_judge]
            .iter()
            .flatten()
            .filter(|s| **s >= threshold)
            .count()
    }

    /// Mean of the present method scores.
    pub fn mean(&self) -> f32 {
        let present: Vec<f32> = [self.structured, self.embedding, self.llm_judge]
            .into_iter()
            .flatten()
            .collect();
        if present.is_empty() {
            return 0.0;
        }
        present.iter().sum::<f32>() / present.len() as f32
    }
}

/// A validated similarity relationship between two companies.
///
/// Edges are bidirectional; both directions are materialized so queries
/// from either endpoint see the relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityEdge {
    pub source: CompanyId,
    pub target: CompanyId,

    /// Composite score: mean of the method scores.
    pub score: f32,

    pub methods: MethodScores,
    pub origin: CandidateOrigin,
    pub created_at: DateTime<Utc>,
}

impl SimilarityEdge {
    pub fn new(
        source: CompanyId,
        target: CompanyId,
        score: f32,
        methods: MethodScores,
        origin: CandidateOrigin,
    ) -> Self {
        Self {
            source,
            target,
            score,
            methods,
            origin,
            created_at: Utc::now(),
        }
    }

    /// The same edge viewed from the other endpoint.
    pub fn reversed(&self) -> Self {
        Self {
            source: self.target,
            target: self.source,
            ..self.clone()
        }
    }
}

/// A similar company returned to the caller, with its validation detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarCompany {
    pub company: Company,
    pub score: f32,
    pub methods: MethodScores,
    pub origin: CandidateOrigin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_counting() {
        let scores = MethodScores {
            structured: Some(0.75),
            embedding: Some(0.82),
            llm_judge: Some(0.55),
        };
        assert_eq!(scores.votes_at_or_above(0.70), 2);
        assert_eq!(scores.votes_at_or_above(0.90), 0);
    }

    #[test]
    fn mean_ignores_missing_methods() {
        let scores = MethodScores {
            structured: Some(0.8),
            embedding: None,
            llm_judge: Some(0.6),
        };
        assert!((scores.mean() - 0.7).abs() < 1e-6);
        assert_eq!(MethodScores::default().mean(), 0.0);
    }

    #[test]
    fn reversed_edge_swaps_endpoints() {
        let a = CompanyId::new();
        let b = CompanyId::new();
        let edge = SimilarityEdge::new(
            a,
            b,
            0.79,
            MethodScores::default(),
            CandidateOrigin::VectorSearch,
        );
        let rev = edge.reversed();
        assert_eq!(rev.source, b);
        assert_eq!(rev.target, a);
        assert_eq!(rev.score, edge.score);
    }
}
