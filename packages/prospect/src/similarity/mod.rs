//! Similarity discovery: propose, validate, and persist relationships
//! between companies.
//!
//! Known mode (the input company has a stored embedding) unions vector
//! nearest-neighbors with LLM-suggested candidates. Unknown mode bootstraps
//! through the search registry and the research pipeline first. Every
//! candidate is validated with three scoring methods; edges are persisted
//! bidirectionally only when at least two methods clear the threshold.

pub mod scoring;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SimilarityConfig;
use crate::docstore::DocumentStore;
use crate::error::{EngineError, Result};
use crate::llm::{complete_with_backoff, json, CompletionRequest, LlmProvider};
use crate::research::{ResearchOrchestrator, ResearchRequest};
use crate::types::{
    canonical_key, CandidateOrigin, Company, CompanyId, JobState, MethodScores, SimilarCompany,
    SimilarityEdge,
};
use crate::vector::{cosine_similarity, push_edge, EdgeRef, MetadataValue, VectorStore};

/// What to find similars for.
#[derive(Debug, Clone)]
pub enum DiscoverTarget {
    /// A company already in the store.
    Known(CompanyId),

    /// A company we may not have researched yet.
    Unknown { name: String, website: Option<String> },
}

const JUDGE_SYSTEM_PROMPT: &str = "\
You compare two company profiles and score how similar the companies are \
as sales prospects: same kind of buyer, same kind of problem, comparable \
offering. Respond with ONLY a JSON object: \
{\"score\": 0.0 to 1.0, \"rationale\": \"one sentence\"}.";

const CANDIDATES_SYSTEM_PROMPT: &str = "\
You suggest companies similar to a described company. Respond with ONLY a \
JSON array: [{\"name\": \"...\", \"website\": \"https://...\", \
\"rationale\": \"...\"}]. Give real companies only; omit the website when \
unsure rather than guessing.";

#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    name: String,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    score: f32,
    #[serde(default)]
    #[allow(dead_code)]
    rationale: Option<String>,
}

/// The similarity engine.
pub struct SimilarityDiscoverer {
    orchestrator: ResearchOrchestrator,
    llm: Arc<dyn LlmProvider>,
    config: SimilarityConfig,
    chat_model: String,
    llm_retries: u32,
    backoff: Duration,
}

impl SimilarityDiscoverer {
    pub fn new(orchestrator: ResearchOrchestrator) -> Self {
        let engine_config = orchestrator.config().clone();
        Self {
            llm: orchestrator.llm(),
            config: engine_config.similarity.clone(),
            chat_model: engine_config.chat_model.clone(),
            llm_retries: engine_config.llm_max_retries,
            backoff: Duration::from_millis(engine_config.llm_backoff_ms),
            orchestrator,
        }
    }

    /// Find similar companies, validate them, persist the edges, and return
    /// the ranked list.
    pub async fn discover(
        &self,
        target: DiscoverTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<SimilarCompany>> {
        let was_unknown = matches!(target, DiscoverTarget::Unknown { .. });
        let company = self.resolve_target(target, cancel).await?;

        info!(company = %company.name, id = %company.id, "similarity discovery starting");

        // Unknown-mode candidates are grounded in external search context;
        // known-mode relies on the stored profile alone.
        let search_context = if was_unknown {
            self.search_context(&company.name).await
        } else {
            None
        };

        // Candidate generation: vector neighbors and LLM suggestions run
        // concurrently.
        let (neighbor_result, suggestion_result) = tokio::join!(
            self.vector_neighbors(&company),
            self.llm_candidates(&company, search_context.as_deref(), cancel),
        );
        let neighbors = neighbor_result?;
        let suggestions = match suggestion_result {
            Ok(suggestions) => suggestions,
            Err(e) => {
                warn!(error = %e, "LLM candidate generation failed, using vector neighbors only");
                Vec::new()
            }
        };

        // Union, deduplicating by canonical (name, website) and dropping
        // the target itself.
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(company.canonical_key());
        let mut candidates: Vec<(Company, CandidateOrigin)> = Vec::new();
        for (candidate, origin) in neighbors.into_iter().chain(suggestions) {
            if seen.insert(candidate.canonical_key()) {
                candidates.push((candidate, origin));
            }
        }

        // Validation: three methods, 2-of-3 voting.
        let mut similar = Vec::new();
        for (candidate, origin) in candidates {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let methods = self.validate_pair(&company, &candidate, cancel).await?;
            match scoring::composite_if_validated(&methods, self.config.threshold) {
                Some(composite) => {
                    debug!(
                        candidate = %candidate.name,
                        composite,
                        "candidate validated"
                    );
                    similar.push(SimilarCompany {
                        company: candidate,
                        score: composite,
                        methods,
                        origin,
                    });
                }
                None => {
                    debug!(candidate = %candidate.name, ?methods, "candidate below threshold");
                }
            }
        }

        similar.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.company.id.cmp(&b.company.id))
        });

        // Materialize the relationship entities and write both directions.
        let edges: Vec<SimilarityEdge> = similar
            .iter()
            .map(|s| SimilarityEdge::new(company.id, s.company.id, s.score, s.methods, s.origin))
            .collect();
        self.persist_edges(&company, &edges).await?;

        info!(
            company = %company.name,
            validated = similar.len(),
            "similarity discovery completed"
        );
        Ok(similar)
    }

    /// Load the target company, researching it first when unknown.
    async fn resolve_target(
        &self,
        target: DiscoverTarget,
        cancel: &CancellationToken,
    ) -> Result<Company> {
        match target {
            DiscoverTarget::Known(id) => self
                .orchestrator
                .get_company(id)
                .await?
                .ok_or(EngineError::JobNotFound {
                    job_id: id.to_string(),
                }),
            DiscoverTarget::Unknown { name, website } => {
                // An already-researched company short-circuits through the
                // orchestrator's own idempotency.
                let mut request = ResearchRequest::new(&name);
                if let Some(website) = website {
                    request = request.with_website(website);
                }
                self.research_to_company(request, cancel).await
            }
        }
    }

    /// Nearest neighbors from the vector index, hydrated from the document
    /// store.
    async fn vector_neighbors(
        &self,
        company: &Company,
    ) -> Result<Vec<(Company, CandidateOrigin)>> {
        if company.embedding.is_empty() {
            return Ok(Vec::new());
        }
        let matches = self
            .orchestrator
            .vector_store()
            .query(&company.embedding, self.config.vector_top_k + 1, &[])
            .await?;

        let mut neighbors = Vec::new();
        for m in matches {
            if m.id == company.id {
                continue;
            }
            if let Some(candidate) = self.orchestrator.get_company(m.id).await? {
                neighbors.push((candidate, CandidateOrigin::VectorSearch));
            }
        }
        Ok(neighbors)
    }

    /// Search summaries used to ground unknown-mode candidate generation.
    async fn search_context(&self, name: &str) -> Option<String> {
        let registry = self.orchestrator.search_registry()?;
        let hits = registry
            .search_all(
                &format!("companies similar to {name} competitors"),
                &crate::search::SearchParams::new(5),
            )
            .await
            .ok()?;

        let lines: Vec<String> = hits
            .iter()
            .take(5)
            .map(|h| format!("- {}: {}", h.title, h.snippet))
            .collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    }

    /// LLM-suggested candidates; unknown ones are researched within the
    /// per-request budget.
    async fn llm_candidates(
        &self,
        company: &Company,
        search_context: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<(Company, CandidateOrigin)>> {
        let mut prompt = format!(
            "Suggest up to {limit} companies similar to this one.\n\n\
             Name: {name}\nProfile:\n{profile}",
            limit = self.config.llm_candidates,
            name = company.name,
            profile = serde_json::to_string_pretty(&company.profile).unwrap_or_default(),
        );
        if let Some(context) = search_context {
            prompt.push_str(&format!("\n\nWeb search context:\n{context}"));
        }
        let request = CompletionRequest::new(&self.chat_model, prompt)
            .with_system(CANDIDATES_SYSTEM_PROMPT)
            .with_max_tokens(1024)
            .with_temperature(0.3);

        let outcome =
            complete_with_backoff(self.llm.as_ref(), &request, self.llm_retries, self.backoff, cancel)
                .await?;

        let raw: Vec<RawCandidate> = match json::parse_lenient(&outcome.completion.text) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "candidate list unparseable, skipping LLM suggestions");
                return Ok(Vec::new());
            }
        };

        // Candidates grounded in web-search context carry that origin.
        let origin = if search_context.is_some() {
            CandidateOrigin::WebSearch
        } else {
            CandidateOrigin::LlmSuggestion
        };

        let mut research_budget = self.config.research_budget;
        let mut candidates = Vec::new();

        for candidate in raw.into_iter().filter(|c| !c.name.trim().is_empty()) {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            // Already stored: use it directly.
            let known = match &candidate.website {
                Some(website) => {
                    let key = canonical_key(&candidate.name, website);
                    self.orchestrator.document_store().find_by_canonical(&key).await?
                }
                None => None,
            };
            if let Some(existing) = known {
                candidates.push((existing, origin));
                continue;
            }

            // Unknown: spend research budget, skip when exhausted or when
            // there is no website to start from.
            let Some(website) = candidate.website else {
                debug!(candidate = %candidate.name, "no website suggested, skipping");
                continue;
            };
            if research_budget == 0 {
                debug!(candidate = %candidate.name, "research budget exhausted, skipping");
                continue;
            }
            research_budget -= 1;

            let request = ResearchRequest::new(candidate.name.trim()).with_website(website);
            match self.research_to_company(request, cancel).await {
                Ok(company) => candidates.push((company, origin)),
                Err(e) => {
                    warn!(candidate_error = %e, "candidate research failed, skipping");
                }
            }
        }

        Ok(candidates)
    }

    /// Run research for a request and return the resulting company.
    async fn research_to_company(
        &self,
        request: ResearchRequest,
        cancel: &CancellationToken,
    ) -> Result<Company> {
        let job_id = self.orchestrator.start(request).await?;

        let job = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = self.orchestrator.cancel(job_id).await;
                return Err(EngineError::Cancelled);
            }
            job = self.orchestrator.await_job(job_id) => job?,
        };

        match (job.state, job.company_id) {
            (JobState::Completed, Some(company_id)) => self
                .orchestrator
                .get_company(company_id)
                .await?
                .ok_or_else(|| EngineError::JobNotFound {
                    job_id: company_id.to_string(),
                }),
            (JobState::Cancelled, _) => Err(EngineError::Cancelled),
            _ => Err(EngineError::JobNotFound {
                job_id: job_id.to_string(),
            }),
        }
    }

    /// Score one pair with all three methods.
    async fn validate_pair(
        &self,
        a: &Company,
        b: &Company,
        cancel: &CancellationToken,
    ) -> Result<MethodScores> {
        let structured = scoring::structured_score(&a.profile, &b.profile, &self.config.weights);

        let embedding = if a.embedding.is_empty() || b.embedding.is_empty() {
            None
        } else {
            Some(scoring::clamp01(cosine_similarity(&a.embedding, &b.embedding)))
        };

        let llm_judge = self.judge(a, b, cancel).await;

        Ok(MethodScores {
            structured: Some(structured),
            embedding,
            llm_judge,
        })
    }

    /// LLM judge; parse failures simply withhold this method's vote.
    async fn judge(&self, a: &Company, b: &Company, cancel: &CancellationToken) -> Option<f32> {
        let prompt = format!(
            "Company A: {}\n{}\n\nCompany B: {}\n{}",
            a.name,
            serde_json::to_string_pretty(&a.profile).unwrap_or_default(),
            b.name,
            serde_json::to_string_pretty(&b.profile).unwrap_or_default(),
        );
        let request = CompletionRequest::new(&self.chat_model, prompt)
            .with_system(JUDGE_SYSTEM_PROMPT)
            .with_max_tokens(256)
            .with_temperature(0.0);

        let outcome = match complete_with_backoff(
            self.llm.as_ref(),
            &request,
            self.llm_retries,
            self.backoff,
            cancel,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "similarity judge call failed");
                return None;
            }
        };

        match json::parse_lenient::<JudgeVerdict>(&outcome.completion.text) {
            Ok(verdict) => Some(scoring::clamp01(verdict.score)),
            Err(e) => {
                warn!(error = %e, "judge verdict unparseable");
                None
            }
        }
    }

    /// Persist validated edges bidirectionally in vector metadata.
    ///
    /// The source's edge list is replaced wholesale by this run's results;
    /// each target gets the reversed edge merged into its own bounded list.
    /// Edges whose target has no vector record are dropped (an edge
    /// requires both endpoints in the store).
    async fn persist_edges(&self, source: &Company, edges: &[SimilarityEdge]) -> Result<()> {
        let vector = self.orchestrator.vector_store();

        if vector.fetch(source.id).await?.is_none() {
            debug!(id = %source.id, "source has no vector record, skipping edge writes");
            return Ok(());
        }

        let mut source_refs: Vec<EdgeRef> = Vec::new();
        let mut kept: Vec<&SimilarityEdge> = Vec::new();
        for edge in edges {
            if vector.fetch(edge.target).await?.is_none() {
                debug!(target = %edge.target, "edge target has no vector record, dropping edge");
                continue;
            }
            push_edge(
                &mut source_refs,
                EdgeRef {
                    target: edge.target,
                    score: edge.score,
                },
                self.config.max_edges,
            );
            kept.push(edge);
        }

        let mut patch = indexmap::IndexMap::new();
        patch.insert("similar".to_string(), MetadataValue::Edges(source_refs.clone()));
        vector.update_metadata(source.id, patch).await?;

        // Symmetric direction, skipping edges the bound just evicted.
        for edge in kept {
            if !source_refs.iter().any(|r| r.target == edge.target) {
                continue;
            }
            let reversed = edge.reversed();
            let existing = vector
                .fetch(reversed.source)
                .await?
                .and_then(|r| r.metadata.get("similar").and_then(|v| v.as_edges().map(<[EdgeRef]>::to_vec)))
                .unwrap_or_default();

            let mut merged = existing;
            push_edge(
                &mut merged,
                EdgeRef {
                    target: reversed.target,
                    score: reversed.score,
                },
                self.config.max_edges,
            );

            let mut patch = indexmap::IndexMap::new();
            patch.insert("similar".to_string(), MetadataValue::Edges(merged));
            vector.update_metadata(reversed.source, patch).await?;
        }

        Ok(())
    }
}
