//! Content aggregation: fuse fetched page texts into a structured profile
//! plus the deterministic embedding text.
//!
//! One LLM call per job when the corpus fits the prompt budget; otherwise
//! pages are sharded, summarized concurrently, and the digests merged
//! (map-reduce). An unparseable response gets one repair retry carrying the
//! malformed output; if that also fails the field set is marked partial and
//! the embedding text is built from the raw corpus.

pub mod prompts;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ModelRates};
use crate::error::Result;
use crate::fetch::html::truncate_chars;
use crate::llm::{complete_with_backoff, json, CompletionOutcome, CompletionRequest, LlmProvider};
use crate::types::{
    BusinessModel, CompanyProfile, CompanyStage, GeographicScope, Leader, PageContent, PhaseUsage,
    TechSophistication,
};

/// Model output before domain transformation. Every field is optional and
/// tolerant: this is best-effort extraction, not schema validation.
#[derive(Debug, Default, Deserialize)]
struct RawProfile {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    industry: Option<String>,
    #[serde(default)]
    business_model: Option<String>,
    #[serde(default)]
    stage: Option<String>,
    #[serde(default)]
    tech_sophistication: Option<String>,
    #[serde(default)]
    geographic_scope: Option<String>,
    #[serde(default)]
    target_market: Option<String>,
    #[serde(default)]
    value_proposition: Option<String>,
    #[serde(default)]
    key_services: Vec<String>,
    #[serde(default)]
    tech_stack: Vec<String>,
    #[serde(default)]
    leadership: Vec<RawLeader>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    founding_year: Option<serde_json::Value>,
    #[serde(default)]
    employee_range: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLeader {
    #[serde(default)]
    name: String,
    #[serde(default)]
    title: String,
}

/// Output of one aggregation run.
#[derive(Debug, Clone)]
pub struct AggregateOutput {
    pub profile: CompanyProfile,

    /// Deterministic embedding input; never empty for a non-empty corpus.
    pub embedding_text: String,

    /// True when the structured fields could not be parsed and only the
    /// raw-corpus embedding text survived.
    pub partial: bool,

    pub usage: PhaseUsage,
}

/// LLM profile aggregation.
pub struct ContentAggregator {
    llm: Arc<dyn LlmProvider>,
    model: String,
    rates: ModelRates,
    aggregate_chars: usize,
    prompt_char_budget: usize,
    embed_char_cap: usize,
    shard_parallelism: usize,
    rate_limit_retries: u32,
    backoff: Duration,
}

impl ContentAggregator {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &EngineConfig) -> Self {
        Self {
            llm,
            model: config.chat_model.clone(),
            rates: config.rates_for(&config.chat_model),
            aggregate_chars: config.aggregate_chars,
            prompt_char_budget: config.prompt_char_budget,
            embed_char_cap: config.embed_char_cap,
            shard_parallelism: config.aggregator_shards.max(1),
            rate_limit_retries: config.llm_max_retries,
            backoff: Duration::from_millis(config.llm_backoff_ms),
        }
    }

    /// Aggregate fetched pages into a profile.
    pub async fn aggregate(
        &self,
        company_name: &str,
        pages: &[PageContent],
        cancel: &CancellationToken,
    ) -> Result<AggregateOutput> {
        let mut usage = PhaseUsage::default();

        let sections = page_sections(pages, self.aggregate_chars);
        let total_chars: usize = sections.iter().map(|s| s.len()).sum();

        let (raw, corpus_for_fallback) = if total_chars <= self.prompt_char_budget {
            let corpus = sections.join("\n\n");
            let prompt = prompts::format_aggregate_prompt(company_name, &corpus);
            let raw = self
                .profile_call(&prompt, &mut usage, cancel)
                .await?;
            (raw, corpus)
        } else {
            info!(
                company = company_name,
                total_chars,
                budget = self.prompt_char_budget,
                "corpus over prompt budget, sharding"
            );
            let digests = self
                .summarize_shards(company_name, &sections, &mut usage, cancel)
                .await?;
            let merged = digests.join("\n\n");
            let prompt = prompts::format_merge_prompt(company_name, &merged);
            let raw = self
                .profile_call(&prompt, &mut usage, cancel)
                .await?;
            (raw, merged)
        };

        let (profile, partial) = match raw {
            Some(raw) => (transform_profile(raw), false),
            None => {
                warn!(
                    company = company_name,
                    "profile stayed unparseable after repair, keeping raw embedding text"
                );
                (CompanyProfile::default(), true)
            }
        };

        let embedding_text = if profile.is_empty() {
            // Salvage: embed the normalized corpus so similarity search
            // still works for this company.
            let collapsed = corpus_for_fallback
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            truncate_chars(
                &format!("{company_name}. {collapsed}"),
                self.embed_char_cap,
            )
        } else {
            build_embedding_text(company_name, &profile, self.embed_char_cap)
        };

        Ok(AggregateOutput {
            profile,
            embedding_text,
            partial,
            usage,
        })
    }

    /// One profile call with a single repair retry. `Ok(None)` means both
    /// attempts produced unparseable output.
    async fn profile_call(
        &self,
        prompt: &str,
        usage: &mut PhaseUsage,
        cancel: &CancellationToken,
    ) -> Result<Option<RawProfile>> {
        let request = CompletionRequest::new(&self.model, prompt)
            .with_system(prompts::AGGREGATE_SYSTEM_PROMPT)
            .with_max_tokens(2048)
            .with_temperature(0.1);

        let outcome = complete_with_backoff(
            self.llm.as_ref(),
            &request,
            self.rate_limit_retries,
            self.backoff,
            cancel,
        )
        .await?;
        outcome.meter(usage, self.rates);

        match json::parse_lenient::<RawProfile>(&outcome.completion.text) {
            Ok(raw) => return Ok(Some(raw)),
            Err(e) => debug!(error = %e, "profile response unparseable, repairing"),
        }

        let repair = json::repair_prompt(prompts::PROFILE_SHAPE, &outcome.completion.text);
        let repair_request = CompletionRequest::new(&self.model, repair)
            .with_system(prompts::AGGREGATE_SYSTEM_PROMPT)
            .with_max_tokens(2048)
            .with_temperature(0.0);

        let repaired = complete_with_backoff(
            self.llm.as_ref(),
            &repair_request,
            self.rate_limit_retries,
            self.backoff,
            cancel,
        )
        .await?;
        repaired.meter(usage, self.rates);

        Ok(json::parse_lenient::<RawProfile>(&repaired.completion.text).ok())
    }

    /// Summarize page sections in bounded-parallel shards.
    async fn summarize_shards(
        &self,
        company_name: &str,
        sections: &[String],
        usage: &mut PhaseUsage,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let shards = pack_shards(sections, self.prompt_char_budget);
        debug!(shards = shards.len(), "summarizing shards");

        let results: Vec<Result<(CompletionOutcome, usize)>> = stream::iter(
            shards.into_iter().enumerate().map(|(i, shard)| {
                let prompt = prompts::format_shard_prompt(company_name, &shard);
                let request = CompletionRequest::new(&self.model, prompt)
                    .with_system(prompts::AGGREGATE_SYSTEM_PROMPT)
                    .with_max_tokens(1024)
                    .with_temperature(0.1);
                async move {
                    let outcome = complete_with_backoff(
                        self.llm.as_ref(),
                        &request,
                        self.rate_limit_retries,
                        self.backoff,
                        cancel,
                    )
                    .await?;
                    Ok((outcome, i))
                }
            }),
        )
        .buffer_unordered(self.shard_parallelism)
        .collect()
        .await;

        let mut digests: Vec<(usize, String)> = Vec::new();
        for result in results {
            let (outcome, index) = result?;
            outcome.meter(usage, self.rates);
            digests.push((index, outcome.completion.text));
        }
        // Keep digest order stable across runs regardless of completion order.
        digests.sort_by_key(|(i, _)| *i);
        Ok(digests.into_iter().map(|(_, d)| d).collect())
    }
}

/// Render pages as "## url" sections, enforcing the aggregate cap.
fn page_sections(pages: &[PageContent], aggregate_cap: usize) -> Vec<String> {
    let mut remaining = aggregate_cap;
    let mut sections = Vec::new();
    for page in pages {
        if remaining == 0 {
            break;
        }
        let text = truncate_chars(&page.text, remaining);
        remaining = remaining.saturating_sub(text.chars().count());
        sections.push(format!("## {}\n{}", page.url, text));
    }
    sections
}

/// Greedily pack sections into shards under the prompt budget. A single
/// oversized section becomes its own (truncated) shard.
fn pack_shards(sections: &[String], budget: usize) -> Vec<String> {
    let mut shards: Vec<String> = Vec::new();
    let mut current = String::new();

    for section in sections {
        let section = if section.chars().count() > budget {
            truncate_chars(section, budget)
        } else {
            section.clone()
        };
        if !current.is_empty() && current.chars().count() + section.chars().count() > budget {
            shards.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&section);
    }
    if !current.is_empty() {
        shards.push(current);
    }
    shards
}

fn clean(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && t != "null")
}

fn clean_set(items: Vec<String>) -> BTreeSet<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn transform_profile(raw: RawProfile) -> CompanyProfile {
    let founding_year = raw.founding_year.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_i64().map(|y| y as i32),
        serde_json::Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    });

    CompanyProfile {
        description: clean(raw.description),
        industry: clean(raw.industry).map(|i| i.to_lowercase()),
        business_model: raw
            .business_model
            .as_deref()
            .and_then(BusinessModel::parse_loose),
        stage: raw.stage.as_deref().and_then(CompanyStage::parse_loose),
        tech_sophistication: raw.tech_sophistication.as_deref().and_then(|t| {
            match t.trim().to_lowercase().as_str() {
                "low" => Some(TechSophistication::Low),
                "medium" | "mid" => Some(TechSophistication::Medium),
                "high" => Some(TechSophistication::High),
                _ => None,
            }
        }),
        geographic_scope: raw.geographic_scope.as_deref().and_then(|g| {
            match g.trim().to_lowercase().as_str() {
                "local" => Some(GeographicScope::Local),
                "regional" | "national" => Some(GeographicScope::Regional),
                "global" | "international" | "worldwide" => Some(GeographicScope::Global),
                _ => None,
            }
        }),
        target_market: clean(raw.target_market),
        value_proposition: clean(raw.value_proposition),
        key_services: clean_set(raw.key_services),
        tech_stack: clean_set(raw.tech_stack),
        leadership: raw
            .leadership
            .into_iter()
            .filter(|l| !l.name.trim().is_empty())
            .map(|l| Leader {
                name: l.name.trim().to_string(),
                title: l.title.trim().to_string(),
            })
            .collect(),
        location: clean(raw.location),
        founding_year,
        employee_range: clean(raw.employee_range),
    }
}

/// Deterministic embedding-text template.
///
/// Same profile in, same text out; the text (with the embedding model id)
/// fully determines the vector.
pub fn build_embedding_text(company_name: &str, profile: &CompanyProfile, char_cap: usize) -> String {
    let mut parts: Vec<String> = vec![format!("Company: {company_name}.")];

    if let Some(description) = &profile.description {
        parts.push(description.clone());
    }
    if let Some(industry) = &profile.industry {
        parts.push(format!("Industry: {industry}."));
    }
    if let Some(model) = &profile.business_model {
        parts.push(format!("Business model: {}.", serde_label(model)));
    }
    if !profile.key_services.is_empty() {
        let services: Vec<&str> = profile.key_services.iter().map(String::as_str).collect();
        parts.push(format!("Key services: {}.", services.join(", ")));
    }
    if !profile.tech_stack.is_empty() {
        let stack: Vec<&str> = profile.tech_stack.iter().map(String::as_str).collect();
        parts.push(format!("Tech stack: {}.", stack.join(", ")));
    }
    if let Some(value_proposition) = &profile.value_proposition {
        parts.push(format!("Value proposition: {value_proposition}"));
    }

    let text = parts.join(" ");
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&normalized, char_cap)
}

fn serde_label(model: &BusinessModel) -> &'static str {
    match model {
        BusinessModel::B2b => "b2b",
        BusinessModel::B2c => "b2c",
        BusinessModel::Saas => "saas",
        BusinessModel::Marketplace => "marketplace",
        BusinessModel::Services => "services",
        BusinessModel::Other => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{page, MockLlm};

    const PROFILE_JSON: &str = r#"{
        "description": "Visterra discovers antibody-based therapeutics.",
        "industry": "Biotechnology",
        "business_model": "b2b",
        "stage": "growth",
        "target_market": "patients with kidney diseases",
        "key_services": ["antibody discovery", "clinical development"],
        "tech_stack": ["hierarchical modeling"],
        "leadership": [{"name": "Jane Roe", "title": "Chief Executive Officer"}],
        "location": "Waltham, MA",
        "founding_year": "2007",
        "employee_range": "51-200",
        "value_proposition": "Precision biologics for hard targets"
    }"#;

    fn aggregator(llm: MockLlm) -> ContentAggregator {
        ContentAggregator::new(Arc::new(llm), &EngineConfig::default())
    }

    #[tokio::test]
    async fn single_call_happy_path() {
        let llm = MockLlm::new(8).with_completion(PROFILE_JSON);
        let aggregator = aggregator(llm.clone_handle());

        let pages = vec![page("https://visterrainc.com/about", "About Visterra")];
        let output = aggregator
            .aggregate("Visterra Inc", &pages, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!output.partial);
        assert_eq!(output.profile.industry.as_deref(), Some("biotechnology"));
        assert_eq!(output.profile.founding_year, Some(2007));
        assert_eq!(output.profile.leadership[0].title, "Chief Executive Officer");
        assert_eq!(llm.completion_calls(), 1);
        assert_eq!(output.usage.llm_calls, 1);
        assert!(output.embedding_text.starts_with("Company: Visterra Inc."));
        assert!(output.embedding_text.contains("antibody discovery"));
    }

    #[tokio::test]
    async fn repair_retry_recovers_from_malformed_json() {
        let llm = MockLlm::new(8)
            .with_completion("The company profile is as follows... no json")
            .with_completion(PROFILE_JSON);
        let aggregator = aggregator(llm.clone_handle());

        let pages = vec![page("https://visterrainc.com/", "Home")];
        let output = aggregator
            .aggregate("Visterra Inc", &pages, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!output.partial);
        assert_eq!(llm.completion_calls(), 2);
        // The repair prompt must carry the malformed output back
        assert!(llm.last_prompt().unwrap().contains("no json"));
    }

    #[tokio::test]
    async fn double_failure_yields_partial_with_raw_embedding_text() {
        let llm = MockLlm::new(8)
            .with_completion("still prose")
            .with_completion("more prose");
        let aggregator = aggregator(llm);

        let pages = vec![page(
            "https://visterrainc.com/",
            "Visterra develops antibody therapeutics for kidney disease.",
        )];
        let output = aggregator
            .aggregate("Visterra Inc", &pages, &CancellationToken::new())
            .await
            .unwrap();

        assert!(output.partial);
        assert!(output.profile.is_empty());
        assert!(output.embedding_text.contains("antibody therapeutics"));
        assert!(!output.embedding_text.is_empty());
    }

    #[tokio::test]
    async fn oversized_corpus_triggers_map_reduce() {
        // Shard digests first (prose), then the merge call returns the profile.
        let llm = MockLlm::new(8)
            .with_completion("digest one")
            .with_completion("digest two")
            .with_completion("digest three")
            .with_completion(PROFILE_JSON);

        let config = EngineConfig {
            prompt_char_budget: 400,
            aggregator_shards: 2,
            ..EngineConfig::default()
        };
        let aggregator = ContentAggregator::new(Arc::new(llm.clone_handle()), &config);

        let pages: Vec<PageContent> = (0..3)
            .map(|i| page(&format!("https://acme.com/{i}"), &"text ".repeat(60)))
            .collect();
        let output = aggregator
            .aggregate("Acme", &pages, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!output.partial);
        // 3 shard calls + 1 merge call
        assert_eq!(llm.completion_calls(), 4);
        assert_eq!(output.usage.llm_calls, 4);
    }

    #[tokio::test]
    async fn aggregate_char_cap_limits_corpus() {
        let pages = vec![
            page("https://acme.com/a", &"alpha ".repeat(100)),
            page("https://acme.com/b", &"beta ".repeat(100)),
        ];
        let sections = page_sections(&pages, 300);
        let total: usize = sections.iter().map(|s| s.chars().count()).sum();
        // Headers are excluded from the cap accounting, so allow slack for them
        assert!(total < 400, "corpus should be capped, got {total}");
    }

    #[test]
    fn embedding_text_is_deterministic() {
        let profile = CompanyProfile {
            description: Some("Makes widgets.".into()),
            industry: Some("manufacturing".into()),
            business_model: Some(BusinessModel::B2b),
            key_services: ["widgets".to_string(), "gadgets".to_string()]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        let a = build_embedding_text("Acme", &profile, 8000);
        let b = build_embedding_text("Acme", &profile, 8000);
        assert_eq!(a, b);
        assert_eq!(
            a,
            "Company: Acme. Makes widgets. Industry: manufacturing. \
             Business model: b2b. Key services: gadgets, widgets."
        );
    }

    #[test]
    fn shard_packing_respects_budget() {
        let sections: Vec<String> = (0..5).map(|i| format!("{}", "x".repeat(80 + i))).collect();
        let shards = pack_shards(&sections, 200);
        assert!(shards.len() >= 2);
        for shard in &shards {
            assert!(shard.chars().count() <= 200 + 2);
        }
    }
}
