//! LLM page selection: rank discovered candidates by likely
//! sales-intelligence value.
//!
//! The model sees a numbered candidate list and returns a JSON array of
//! indices. Parsing is defensive; after two failed retries a deterministic
//! heuristic ranker takes over so a flaky model never sinks a job.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ModelRates};
use crate::error::{DiscoveryError, Result, SelectionError};
use crate::llm::{complete_with_backoff, json, CompletionRequest, LlmProvider};
use crate::types::{PageCandidate, PhaseUsage};

/// Path keywords in descending heuristic priority.
const PRIORITY_KEYWORDS: &[&str] = &[
    "about", "team", "leadership", "contact", "services", "products", "pricing", "customers",
    "careers",
];

/// Parse retries after the first attempt.
const SELECTOR_RETRIES: u32 = 2;

const SELECT_SYSTEM_PROMPT: &str = "\
You rank website pages by how much sales intelligence they likely contain \
about a company: what it does, who it serves, its products and services, \
its technology, its leadership, its scale. Respond with ONLY a JSON array \
of candidate indices, best first.";

/// The selector's output.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Chosen URLs, in rank order, at most the configured page count.
    pub urls: Vec<String>,

    /// Token accounting for the selection calls.
    pub usage: PhaseUsage,

    /// True when the heuristic ranker produced the result.
    pub used_fallback: bool,
}

/// LLM-backed page selector with heuristic fallback.
pub struct PageSelector {
    llm: Arc<dyn LlmProvider>,
    model: String,
    max_pages: usize,
    prompt_candidates: usize,
    rate_limit_retries: u32,
    backoff: Duration,
    rates: ModelRates,
}

impl PageSelector {
    pub fn new(llm: Arc<dyn LlmProvider>, config: &EngineConfig) -> Self {
        Self {
            llm,
            model: config.chat_model.clone(),
            max_pages: config.selector_max_pages,
            prompt_candidates: config.selector_prompt_candidates,
            rate_limit_retries: config.llm_max_retries,
            backoff: Duration::from_millis(config.llm_backoff_ms),
            rates: config.rates_for(&config.chat_model),
        }
    }

    /// Select up to the configured number of pages.
    ///
    /// Deterministic given the same candidates and the same model output.
    pub async fn select(
        &self,
        company_name: &str,
        candidates: &[PageCandidate],
        cancel: &CancellationToken,
    ) -> Result<Selection> {
        if candidates.is_empty() {
            return Err(DiscoveryError::NoCandidatesFound.into());
        }

        // Fewer candidates than the page budget: nothing to rank.
        if candidates.len() <= self.max_pages {
            return Ok(Selection {
                urls: candidates.iter().map(|c| c.url.clone()).collect(),
                usage: PhaseUsage::default(),
                used_fallback: false,
            });
        }

        // Over the prompt budget the model sees a heuristic-prioritized
        // prefix; the ranking still happens on what it sees.
        let visible: Vec<&PageCandidate> = if candidates.len() > self.prompt_candidates {
            let mut ranked: Vec<&PageCandidate> = candidates.iter().collect();
            ranked.sort_by_key(|c| heuristic_rank(c));
            ranked.truncate(self.prompt_candidates);
            ranked
        } else {
            candidates.iter().collect()
        };

        let mut usage = PhaseUsage::default();
        let mut prompt = format_select_prompt(company_name, &visible, self.max_pages);

        for attempt in 0..=SELECTOR_RETRIES {
            let request = CompletionRequest::new(&self.model, prompt.clone())
                .with_system(SELECT_SYSTEM_PROMPT)
                .with_max_tokens(512)
                .with_temperature(0.0);

            let outcome = complete_with_backoff(
                self.llm.as_ref(),
                &request,
                self.rate_limit_retries,
                self.backoff,
                cancel,
            )
            .await?;
            outcome.meter(&mut usage, self.rates);

            match json::parse_lenient::<Vec<i64>>(&outcome.completion.text) {
                Ok(indices) => {
                    let urls = resolve_indices(&indices, &visible, self.max_pages);
                    if urls.is_empty() {
                        warn!(
                            company = company_name,
                            attempt, "selector returned no usable indices"
                        );
                    } else {
                        info!(
                            company = company_name,
                            selected = urls.len(),
                            candidates = candidates.len(),
                            "pages selected"
                        );
                        return Ok(Selection {
                            urls,
                            usage,
                            used_fallback: false,
                        });
                    }
                }
                Err(e) => {
                    debug!(company = company_name, attempt, error = %e, "selector response unparseable");
                }
            }

            prompt = json::repair_prompt("[0, 3, 7]", &outcome.completion.text);
        }

        // Heuristic fallback: deterministic, never empty for a non-empty
        // candidate list.
        warn!(
            company = company_name,
            "selector LLM unusable after retries, using heuristic ranking"
        );
        let urls = heuristic_select(candidates, self.max_pages);
        if urls.is_empty() {
            return Err(SelectionError::EmptySelection.into());
        }
        Ok(Selection {
            urls,
            usage,
            used_fallback: true,
        })
    }
}

/// Map model indices to candidate URLs.
///
/// Out-of-range indices are dropped (clamp-and-continue), duplicates keep
/// their first position, and the result is capped at `max_pages`.
fn resolve_indices(indices: &[i64], visible: &[&PageCandidate], max_pages: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for &index in indices {
        if urls.len() >= max_pages {
            break;
        }
        let Ok(index) = usize::try_from(index) else {
            continue;
        };
        let Some(candidate) = visible.get(index) else {
            continue;
        };
        if seen.insert(candidate.url.clone()) {
            urls.push(candidate.url.clone());
        }
    }
    urls
}

/// Heuristic rank: smaller sorts first.
fn heuristic_rank(candidate: &PageCandidate) -> (usize, usize, usize) {
    let path = candidate.path().to_lowercase();
    let keyword_rank = PRIORITY_KEYWORDS
        .iter()
        .position(|kw| path.contains(kw))
        .unwrap_or(usize::MAX);

    // Homepage lands after keyword matches, everything else behind it.
    let tier = if keyword_rank != usize::MAX {
        0
    } else if path == "/" || path.is_empty() {
        1
    } else {
        2
    };
    (tier, keyword_rank.min(PRIORITY_KEYWORDS.len()), candidate.depth)
}

/// Rank candidates without a model.
fn heuristic_select(candidates: &[PageCandidate], max_pages: usize) -> Vec<String> {
    let mut ranked: Vec<&PageCandidate> = candidates.iter().collect();
    ranked.sort_by_key(|c| heuristic_rank(c));
    ranked.iter().take(max_pages).map(|c| c.url.clone()).collect()
}

fn format_select_prompt(company_name: &str, visible: &[&PageCandidate], max_pages: usize) -> String {
    let mut lines = String::new();
    for (i, candidate) in visible.iter().enumerate() {
        match &candidate.anchor_text {
            Some(anchor) => {
                lines.push_str(&format!("{i}. {} (\"{}\")\n", candidate.path(), anchor));
            }
            None => lines.push_str(&format!("{i}. {}\n", candidate.path())),
        }
    }

    format!(
        "Company: {company_name}\n\n\
         Candidate pages ({count} total), numbered:\n{lines}\n\
         Pick the {max_pages} pages most likely to contain sales-relevant \
         intelligence about {company_name}, ordered best first. For each pick, \
         weigh what the path and link text promise.\n\n\
         Respond with ONLY a JSON array of indices, e.g. [0, 3, 7].",
        count = visible.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlm;
    use crate::types::{DiscoverySource, DiscoverySource::*};

    fn candidate(url: &str, source: DiscoverySource, depth: usize) -> PageCandidate {
        PageCandidate::new(url, source, depth)
    }

    fn many_candidates() -> Vec<PageCandidate> {
        vec![
            candidate("https://acme.com/", Seed, 0),
            candidate("https://acme.com/blog/post-1", Recursive, 2),
            candidate("https://acme.com/about", Seed, 1),
            candidate("https://acme.com/pricing", Sitemap, 0),
            candidate("https://acme.com/blog/post-2", Recursive, 2),
            candidate("https://acme.com/team", Sitemap, 0),
            candidate("https://acme.com/news", Recursive, 2),
            candidate("https://acme.com/blog/post-3", Recursive, 3),
            candidate("https://acme.com/blog/post-4", Recursive, 3),
            candidate("https://acme.com/blog/post-5", Recursive, 3),
            candidate("https://acme.com/blog/post-6", Recursive, 3),
        ]
    }

    fn selector_with(llm: MockLlm, max_pages: usize) -> PageSelector {
        let config = EngineConfig::default().with_selector_max_pages(max_pages);
        PageSelector::new(Arc::new(llm), &config)
    }

    #[tokio::test]
    async fn parses_markdown_fenced_indices_in_order() {
        let llm = MockLlm::new(8).with_completion("```json\n[0,2,5]\n```");
        let selector = selector_with(llm, 5);

        let selection = selector
            .select("Acme", &many_candidates(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            selection.urls,
            vec![
                "https://acme.com/",
                "https://acme.com/about",
                "https://acme.com/team",
            ]
        );
        assert!(!selection.used_fallback);
    }

    #[tokio::test]
    async fn out_of_range_indices_are_dropped() {
        let llm = MockLlm::new(8).with_completion("[2, 99, -1, 3]");
        let selector = selector_with(llm, 5);

        let selection = selector
            .select("Acme", &many_candidates(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            selection.urls,
            vec!["https://acme.com/about", "https://acme.com/pricing"]
        );
    }

    #[tokio::test]
    async fn unparseable_responses_fall_back_to_heuristic() {
        let llm = MockLlm::new(8)
            .with_completion("I think the about page is best!")
            .with_completion("still not json")
            .with_completion("nope");
        let selector = selector_with(llm.clone_handle(), 5);

        let selection = selector
            .select("Acme", &many_candidates(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(selection.used_fallback);
        assert_eq!(llm.completion_calls(), 3);
        // about > team > pricing (keyword priority), then homepage
        assert_eq!(selection.urls[0], "https://acme.com/about");
        assert_eq!(selection.urls[1], "https://acme.com/team");
        assert_eq!(selection.urls[2], "https://acme.com/pricing");
        assert!(selection.urls.contains(&"https://acme.com/".to_string()));
    }

    #[tokio::test]
    async fn small_candidate_lists_skip_the_model() {
        let llm = MockLlm::new(8);
        let selector = selector_with(llm.clone_handle(), 10);

        let candidates = vec![
            candidate("https://acme.com/", Seed, 0),
            candidate("https://acme.com/about", Seed, 1),
        ];
        let selection = selector
            .select("Acme", &candidates, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(selection.urls.len(), 2);
        assert_eq!(llm.completion_calls(), 0);
    }

    #[tokio::test]
    async fn empty_candidates_fail_with_no_candidates_kind() {
        let selector = selector_with(MockLlm::new(8), 10);
        let err = selector
            .select("Acme", &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NoCandidatesFound");
    }

    #[tokio::test]
    async fn oversized_candidate_list_is_truncated_for_the_prompt() {
        let mut candidates = many_candidates();
        for i in 0..300 {
            candidates.push(candidate(
                &format!("https://acme.com/archive/{i}"),
                Recursive,
                3,
            ));
        }

        let llm = MockLlm::new(8).with_completion("[0, 1]");
        let config = EngineConfig {
            selector_prompt_candidates: 50,
            ..EngineConfig::default()
        };
        let selector = PageSelector::new(Arc::new(llm.clone_handle()), &config);

        let selection = selector
            .select("Acme", &candidates, &CancellationToken::new())
            .await
            .unwrap();

        // A valid selection still comes back, drawn from the prioritized
        // visible prefix.
        assert!(!selection.urls.is_empty());
        let prompt = llm.last_prompt().unwrap();
        assert!(!prompt.contains("/archive/299"));
        assert!(prompt.contains("/about"));
    }
}
