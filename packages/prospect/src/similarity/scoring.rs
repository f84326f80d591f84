//! Composite similarity scoring.
//!
//! Three methods, each in [0, 1]: weighted structured field overlap, cosine
//! of the stored embeddings, and an LLM judge. An edge is written only when
//! at least two methods clear the threshold; the persisted composite is the
//! mean of the method scores.

use std::collections::BTreeSet;

use crate::config::StructuredWeights;
use crate::types::{CompanyProfile, MethodScores};

/// Tech-stack synonym groups; matching any alias maps to the canonical name.
const TECH_SYNONYMS: &[(&str, &[&str])] = &[
    ("javascript", &["js", "ecmascript"]),
    ("typescript", &["ts"]),
    ("node.js", &["node", "nodejs"]),
    ("react", &["react.js", "reactjs"]),
    ("vue", &["vue.js", "vuejs"]),
    ("kubernetes", &["k8s"]),
    ("postgresql", &["postgres", "pgsql"]),
    ("amazon web services", &["aws"]),
    ("google cloud", &["gcp", "google cloud platform"]),
    ("microsoft azure", &["azure"]),
    ("ruby on rails", &["rails", "ror"]),
    ("machine learning", &["ml"]),
    ("artificial intelligence", &["ai"]),
];

/// Clamp into [0, 1].
pub fn clamp01(score: f32) -> f32 {
    score.clamp(0.0, 1.0)
}

/// Token-level Jaccard similarity of two free-text fields.
pub fn token_jaccard(a: &str, b: &str) -> f32 {
    jaccard(&tokenize(a), &tokenize(b))
}

/// Jaccard over the token union of each set's items.
pub fn set_token_jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let tokens_a: BTreeSet<String> = a.iter().flat_map(|item| tokenize(item)).collect();
    let tokens_b: BTreeSet<String> = b.iter().flat_map(|item| tokenize(item)).collect();
    jaccard(&tokens_a, &tokens_b)
}

/// Jaccard over synonym-normalized tech-stack entries.
pub fn tech_stack_jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let canon_a: BTreeSet<String> = a.iter().map(|t| canonical_tech(t)).collect();
    let canon_b: BTreeSet<String> = b.iter().map(|t| canonical_tech(t)).collect();
    jaccard(&canon_a, &canon_b)
}

/// Weighted field overlap between two profiles.
///
/// Weights for fields missing on either side are simply not earned, so two
/// sparse profiles cannot fake high similarity.
pub fn structured_score(
    a: &CompanyProfile,
    b: &CompanyProfile,
    weights: &StructuredWeights,
) -> f32 {
    let mut score = 0.0;

    if let (Some(ia), Some(ib)) = (&a.industry, &b.industry) {
        if ia.trim().eq_ignore_ascii_case(ib.trim()) {
            score += weights.industry;
        }
    }

    if let (Some(ma), Some(mb)) = (a.business_model, b.business_model) {
        if ma == mb {
            score += weights.business_model;
        }
    }

    if let (Some(ta), Some(tb)) = (&a.target_market, &b.target_market) {
        score += weights.target_market * token_jaccard(ta, tb);
    }

    if !a.key_services.is_empty() && !b.key_services.is_empty() {
        score += weights.key_services * set_token_jaccard(&a.key_services, &b.key_services);
    }

    if !a.tech_stack.is_empty() && !b.tech_stack.is_empty() {
        score += weights.tech_stack * tech_stack_jaccard(&a.tech_stack, &b.tech_stack);
    }

    clamp01(score)
}

/// Did enough methods clear the threshold for an edge?
///
/// Returns the composite (mean of present methods) only when at least two
/// of the three scored at or above the threshold.
pub fn composite_if_validated(scores: &MethodScores, threshold: f32) -> Option<f32> {
    if scores.votes_at_or_above(threshold) >= 2 {
        Some(clamp01(scores.mean()))
    } else {
        None
    }
}

fn canonical_tech(term: &str) -> String {
    let lower = term.trim().to_lowercase();
    for (canonical, aliases) in TECH_SYNONYMS {
        if lower == *canonical || aliases.contains(&lower.as_str()) {
            return (*canonical).to_string();
        }
    }
    lower
}

fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BusinessModel;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn token_jaccard_basics() {
        assert_eq!(token_jaccard("mid-market biotech firms", "mid-market biotech firms"), 1.0);
        assert_eq!(token_jaccard("alpha beta", "gamma delta"), 0.0);
        let partial = token_jaccard("enterprise healthcare providers", "enterprise retail providers");
        assert!(partial > 0.0 && partial < 1.0);
    }

    #[test]
    fn synonyms_normalize_tech_stacks() {
        let a = set(&["k8s", "postgres", "React.js"]);
        let b = set(&["kubernetes", "postgresql", "react"]);
        assert_eq!(tech_stack_jaccard(&a, &b), 1.0);
    }

    #[test]
    fn structured_score_exact_profile() {
        let profile = CompanyProfile {
            industry: Some("biotechnology".into()),
            business_model: Some(BusinessModel::B2b),
            target_market: Some("hospital networks".into()),
            key_services: set(&["antibody discovery"]),
            tech_stack: set(&["machine learning"]),
            ..Default::default()
        };
        let score = structured_score(&profile, &profile.clone(), &StructuredWeights::default());
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn structured_score_missing_fields_earn_nothing() {
        let sparse = CompanyProfile::default();
        assert_eq!(
            structured_score(&sparse, &sparse.clone(), &StructuredWeights::default()),
            0.0
        );
    }

    #[test]
    fn industry_mismatch_drops_largest_weight() {
        let a = CompanyProfile {
            industry: Some("biotechnology".into()),
            business_model: Some(BusinessModel::B2b),
            ..Default::default()
        };
        let b = CompanyProfile {
            industry: Some("fintech".into()),
            business_model: Some(BusinessModel::B2b),
            ..Default::default()
        };
        let score = structured_score(&a, &b, &StructuredWeights::default());
        assert!((score - 0.15).abs() < 1e-6);
    }

    #[test]
    fn two_of_three_voting() {
        let threshold = 0.70;

        let passing = MethodScores {
            structured: Some(0.75),
            embedding: Some(0.82),
            llm_judge: Some(0.50),
        };
        let composite = composite_if_validated(&passing, threshold).unwrap();
        assert!((composite - (0.75 + 0.82 + 0.50) / 3.0).abs() < 1e-6);

        let failing = MethodScores {
            structured: Some(0.75),
            embedding: Some(0.60),
            llm_judge: Some(0.50),
        };
        assert!(composite_if_validated(&failing, threshold).is_none());

        // Scenario E numbers
        let scenario_e = MethodScores {
            structured: Some(0.75),
            embedding: Some(0.82),
            llm_judge: Some(0.80),
        };
        let composite = composite_if_validated(&scenario_e, threshold).unwrap();
        assert!((composite - 0.79).abs() < 0.005);
    }
}
