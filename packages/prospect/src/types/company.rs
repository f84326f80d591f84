//! Company profile types - the principal artifact of a research job.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Opaque company identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CompanyId(pub Uuid);

impl CompanyId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CompanyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How the company makes money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessModel {
    B2b,
    B2c,
    Saas,
    Marketplace,
    Services,
    Other,
}

impl BusinessModel {
    /// Tolerant parse of model output ("B2B SaaS", "b2b", "software as a
    /// service"). Falls back to `Other` only for genuinely unknown text.
    pub fn parse_loose(text: &str) -> Option<Self> {
        let t = text.trim().to_lowercase();
        if t.is_empty() {
            return None;
        }
        Some(if t.contains("saas") || t.contains("software as a service") {
            Self::Saas
        } else if t.contains("marketplace") {
            Self::Marketplace
        } else if t.contains("b2b") {
            Self::B2b
        } else if t.contains("b2c") || t.contains("consumer") {
            Self::B2c
        } else if t.contains("service") || t.contains("consult") || t.contains("agency") {
            Self::Services
        } else {
            Self::Other
        })
    }
}

/// Maturity of the company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStage {
    Startup,
    Growth,
    Mature,
    Enterprise,
}

impl CompanyStage {
    pub fn parse_loose(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "startup" | "early" | "seed" => Some(Self::Startup),
            "growth" | "scaleup" | "scale-up" => Some(Self::Growth),
            "mature" | "established" => Some(Self::Mature),
            "enterprise" | "large" => Some(Self::Enterprise),
            _ => None,
        }
    }
}

/// How technically sophisticated the company appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechSophistication {
    Low,
    Medium,
    High,
}

/// Geographic reach of the business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographicScope {
    Local,
    Regional,
    Global,
}

/// A named person in a leadership role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leader {
    pub name: String,
    pub title: String,
}

/// Extracted profile fields. All best-effort; missing fields are permitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub description: Option<String>,
    pub industry: Option<String>,
    pub business_model: Option<BusinessModel>,
    pub stage: Option<CompanyStage>,
    pub tech_sophistication: Option<TechSophistication>,
    pub geographic_scope: Option<GeographicScope>,
    pub target_market: Option<String>,
    pub value_proposition: Option<String>,
    #[serde(default)]
    pub key_services: BTreeSet<String>,
    #[serde(default)]
    pub tech_stack: BTreeSet<String>,
    #[serde(default)]
    pub leadership: Vec<Leader>,
    pub location: Option<String>,
    pub founding_year: Option<i32>,
    pub employee_range: Option<String>,
}

impl CompanyProfile {
    /// A profile with no extracted fields at all.
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.industry.is_none()
            && self.business_model.is_none()
            && self.target_market.is_none()
            && self.value_proposition.is_none()
            && self.key_services.is_empty()
            && self.tech_stack.is_empty()
            && self.leadership.is_empty()
            && self.location.is_none()
            && self.founding_year.is_none()
            && self.employee_range.is_none()
    }
}

/// Per-job bookkeeping carried on the stored company.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    /// When the research crawl completed.
    pub crawled_at: Option<DateTime<Utc>>,

    /// URLs actually fetched (successes only).
    #[serde(default)]
    pub fetched_urls: Vec<String>,

    /// Total LLM + embedding input tokens across the job.
    pub input_tokens: u64,

    /// Total LLM output tokens across the job.
    pub output_tokens: u64,

    /// Estimated spend in USD, from the configured model rates.
    pub estimated_cost: f64,

    /// Wall time per phase, in milliseconds.
    #[serde(default)]
    pub phase_durations_ms: Vec<(String, u64)>,
}

impl Provenance {
    pub fn record_phase(&mut self, phase: &str, duration: Duration) {
        self.phase_durations_ms
            .push((phase.to_string(), duration.as_millis() as u64));
    }
}

/// The principal artifact: one researched company.
///
/// The embedding vector and the embedding text are always paired; neither
/// is ever stored without the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,

    /// Canonical display name.
    pub name: String,

    /// Website normalized to scheme+host.
    pub website: String,

    pub profile: CompanyProfile,

    /// The verbatim input used to produce the embedding vector.
    pub embedding_text: String,

    /// Dense embedding of `embedding_text`.
    pub embedding: Vec<f32>,

    /// Set when aggregation produced an empty profile but usable embedding
    /// text.
    pub low_quality: bool,

    pub provenance: Provenance,
}

impl Company {
    /// Identity key used for deduplication and staleness checks.
    pub fn canonical_key(&self) -> String {
        canonical_key(&self.name, &self.website)
    }

    /// Content hash of the embedding text; a stable hash across re-research
    /// means the vector record does not need to change.
    pub fn embedding_text_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.embedding_text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Canonical (name, website) identity key.
///
/// Name is lowercased and whitespace-collapsed; website is reduced to its
/// lowercased host with any `www.` prefix dropped.
pub fn canonical_key(name: &str, website: &str) -> String {
    let name_part = name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let host_part = url::Url::parse(website)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .map(|h| h.strip_prefix("www.").map(str::to_string).unwrap_or(h))
        .unwrap_or_default();
    format!("{}|{}", name_part, host_part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_model_loose_parse() {
        assert_eq!(BusinessModel::parse_loose("B2B SaaS"), Some(BusinessModel::Saas));
        assert_eq!(BusinessModel::parse_loose("b2b"), Some(BusinessModel::B2b));
        assert_eq!(
            BusinessModel::parse_loose("two-sided marketplace"),
            Some(BusinessModel::Marketplace)
        );
        assert_eq!(BusinessModel::parse_loose(""), None);
        assert_eq!(
            BusinessModel::parse_loose("quantum flux"),
            Some(BusinessModel::Other)
        );
    }

    #[test]
    fn canonical_key_normalizes() {
        let a = canonical_key("Visterra  Inc", "https://www.visterrainc.com/about");
        let b = canonical_key("visterra inc", "https://VISTERRAINC.COM");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_profile_detection() {
        assert!(CompanyProfile::default().is_empty());

        let profile = CompanyProfile {
            industry: Some("biotechnology".into()),
            ..Default::default()
        };
        assert!(!profile.is_empty());
    }

    #[test]
    fn embedding_text_hash_is_stable() {
        let mut company = Company {
            id: CompanyId::new(),
            name: "Acme".into(),
            website: "https://acme.com".into(),
            profile: CompanyProfile::default(),
            embedding_text: "Acme. Widgets.".into(),
            embedding: vec![0.0; 4],
            low_quality: false,
            provenance: Provenance::default(),
        };
        let h1 = company.embedding_text_hash();
        company.embedding = vec![1.0; 4];
        assert_eq!(h1, company.embedding_text_hash());
    }
}
