//! Research orchestration: drive the four-phase pipeline as a job state
//! machine.
//!
//! One orchestrator owns the shared stores; each job runs as an independent
//! task under a global concurrency semaphore. Writes to a single company id
//! are serialized by keeping at most one in-flight job per canonical
//! (name, website) key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregate::ContentAggregator;
use crate::config::EngineConfig;
use crate::discovery::LinkDiscoverer;
use crate::docstore::DocumentStore;
use crate::error::{EngineError, Result};
use crate::events::{JobEvent, ProgressBus};
use crate::fetch::{FetchOutcome, PageFetcher, ParallelFetcher};
use crate::llm::LlmProvider;
use crate::search::{SearchParams, SearchRegistry};
use crate::selection::PageSelector;
use crate::types::{
    canonical_key, site_root, Company, CompanyId, JobError, JobId, JobState, Phase, Provenance,
    ResearchJob,
};
use crate::vector::{MetadataValue, VectorRecord, VectorStore};

/// A research request from the control API.
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    pub name: String,
    pub website: Option<String>,

    /// Re-run even when a fresh result exists.
    pub force: bool,
}

impl ResearchRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            website: None,
            force: false,
        }
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Result of a cancel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyTerminal,
}

struct JobHandle {
    job: Arc<tokio::sync::RwLock<ResearchJob>>,
    cancel: CancellationToken,
    state_rx: watch::Receiver<JobState>,
    state_tx: watch::Sender<JobState>,
}

pub(crate) struct OrchestratorInner {
    config: EngineConfig,
    llm: Arc<dyn LlmProvider>,
    vector: Arc<dyn VectorStore>,
    docs: Arc<dyn DocumentStore>,
    registry: Option<Arc<SearchRegistry>>,
    bus: Arc<ProgressBus>,

    discoverer: LinkDiscoverer,
    selector: PageSelector,
    fetcher: ParallelFetcher,
    aggregator: ContentAggregator,

    jobs: RwLock<HashMap<JobId, JobHandle>>,
    canonical_inflight: Mutex<HashMap<String, JobId>>,
    job_semaphore: Arc<Semaphore>,
}

/// The research pipeline driver.
#[derive(Clone)]
pub struct ResearchOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl ResearchOrchestrator {
    pub fn new(
        config: EngineConfig,
        llm: Arc<dyn LlmProvider>,
        page_fetcher: Arc<dyn PageFetcher>,
        vector: Arc<dyn VectorStore>,
        docs: Arc<dyn DocumentStore>,
    ) -> Self {
        let discoverer = LinkDiscoverer::new(Arc::clone(&page_fetcher), &config);
        let selector = PageSelector::new(Arc::clone(&llm), &config);
        let fetcher = ParallelFetcher::new(page_fetcher, &config);
        let aggregator = ContentAggregator::new(Arc::clone(&llm), &config);
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));

        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                llm,
                vector,
                docs,
                registry: None,
                bus: Arc::new(ProgressBus::new()),
                discoverer,
                selector,
                fetcher,
                aggregator,
                jobs: RwLock::new(HashMap::new()),
                canonical_inflight: Mutex::new(HashMap::new()),
                job_semaphore,
            }),
        }
    }

    /// Attach a search registry, enabling research by name alone.
    pub fn with_search_registry(mut self, registry: Arc<SearchRegistry>) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_search_registry must be called before the orchestrator is shared");
        inner.registry = Some(registry);
        self
    }

    /// The engine configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The vector store, shared with the similarity discoverer.
    pub fn vector_store(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.inner.vector)
    }

    /// The document store, shared with the similarity discoverer.
    pub fn document_store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.inner.docs)
    }

    /// The LLM provider.
    pub fn llm(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.inner.llm)
    }

    /// The attached search registry, if any.
    pub fn search_registry(&self) -> Option<Arc<SearchRegistry>> {
        self.inner.registry.as_ref().map(Arc::clone)
    }

    /// Start research, or return the job covering an existing fresh result
    /// (idempotent by canonical key within the staleness TTL).
    pub async fn start(&self, request: ResearchRequest) -> Result<JobId> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::InvalidCompanyName {
                reason: "name is empty".to_string(),
            });
        }

        let website = match &request.website {
            Some(raw) => site_root(raw).map_err(|_| EngineError::InvalidUrl { url: raw.clone() })?,
            None => self.resolve_website(&name).await?,
        };

        let canonical = canonical_key(&name, &website);

        // Freshness short-circuit: a recent completed job for the same
        // canonical key returns the existing company without re-running.
        if !request.force {
            if let Some(existing) = self.inner.docs.find_by_canonical(&canonical).await? {
                let fresh = existing
                    .provenance
                    .crawled_at
                    .map(|at| Utc::now() - at < self.inner.config.research_staleness())
                    .unwrap_or(false);
                if fresh {
                    info!(company = %name, id = %existing.id, "returning fresh existing result");
                    return Ok(self.completed_job_for(&name, &website, existing.id));
                }
            }
        }

        let job = ResearchJob::new(&name, &website);
        let job_id = job.id;

        // One in-flight job per canonical key serializes writes per id;
        // the check-and-claim is atomic under the lock.
        {
            let mut inflight = self.inner.canonical_inflight.lock().unwrap();
            if let Some(existing) = inflight.get(&canonical) {
                return Ok(*existing);
            }
            inflight.insert(canonical.clone(), job_id);
        }
        self.install_handle(job);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_job(inner, job_id, canonical).await;
        });

        Ok(job_id)
    }

    /// Snapshot of a job's current state.
    pub async fn status(&self, job_id: JobId) -> Option<ResearchJob> {
        let handle_job = {
            let jobs = self.inner.jobs.read().unwrap();
            jobs.get(&job_id).map(|h| Arc::clone(&h.job))
        }?;
        let snapshot = handle_job.read().await.clone();
        Some(snapshot)
    }

    /// Cooperatively cancel a job.
    pub async fn cancel(&self, job_id: JobId) -> Result<CancelOutcome> {
        let (job, cancel) = {
            let jobs = self.inner.jobs.read().unwrap();
            let handle = jobs.get(&job_id).ok_or(EngineError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
            (Arc::clone(&handle.job), handle.cancel.clone())
        };

        if job.read().await.state.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }
        cancel.cancel();
        Ok(CancelOutcome::Cancelled)
    }

    /// Wait for a job to reach a terminal state and return its snapshot.
    pub async fn await_job(&self, job_id: JobId) -> Result<ResearchJob> {
        let (job, mut state_rx) = {
            let jobs = self.inner.jobs.read().unwrap();
            let handle = jobs.get(&job_id).ok_or(EngineError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
            (Arc::clone(&handle.job), handle.state_rx.clone())
        };

        while !state_rx.borrow().is_terminal() {
            if state_rx.changed().await.is_err() {
                break;
            }
        }
        let snapshot = job.read().await.clone();
        Ok(snapshot)
    }

    /// Subscribe to a job's progress stream.
    pub fn subscribe(&self, job_id: JobId) -> Option<broadcast::Receiver<JobEvent>> {
        self.inner.bus.subscribe(job_id)
    }

    /// Fetch a researched company by id.
    pub async fn get_company(&self, id: CompanyId) -> Result<Option<Company>> {
        Ok(self.inner.docs.get(id).await?)
    }

    /// Resolve a website for a bare company name through the search
    /// registry.
    async fn resolve_website(&self, name: &str) -> Result<String> {
        let registry = self
            .inner
            .registry
            .as_ref()
            .ok_or(crate::error::SearchError::NoSearchResults)?;

        let hits = registry
            .search_all(&format!("{name} official website"), &SearchParams::new(5))
            .await?;
        let first = hits.first().ok_or(crate::error::SearchError::NoSearchResults)?;
        site_root(&first.url).map_err(|_| EngineError::InvalidUrl {
            url: first.url.clone(),
        })
    }

    /// Record an immediately-completed job pointing at an existing company.
    fn completed_job_for(&self, name: &str, website: &str, company_id: CompanyId) -> JobId {
        let mut job = ResearchJob::new(name, website);
        job.state = JobState::Completed;
        job.company_id = Some(company_id);
        let job_id = job.id;

        self.inner.bus.register(job_id);
        self.install_handle(job);
        self.inner.bus.terminal(job_id, JobState::Completed, None);
        job_id
    }

    fn install_handle(&self, job: ResearchJob) {
        let job_id = job.id;
        let (state_tx, state_rx) = watch::channel(job.state);
        self.inner.bus.register(job_id);
        self.inner.jobs.write().unwrap().insert(
            job_id,
            JobHandle {
                job: Arc::new(tokio::sync::RwLock::new(job)),
                cancel: CancellationToken::new(),
                state_rx,
                state_tx,
            },
        );
    }
}

struct JobContext {
    job: Arc<tokio::sync::RwLock<ResearchJob>>,
    cancel: CancellationToken,
    state_tx: watch::Sender<JobState>,

    /// Vector id upserted but not yet covered by a document write; deleted
    /// as compensation when the job does not complete.
    uncommitted_vector: Mutex<Option<CompanyId>>,
}

async fn run_job(inner: Arc<OrchestratorInner>, job_id: JobId, canonical: String) {
    let Some(ctx) = job_context(&inner, job_id) else {
        return;
    };

    // Global job-concurrency cap; cancellation can arrive while queued.
    let permit = tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        permit = inner.job_semaphore.acquire() => permit.ok(),
    };

    let outcome = if permit.is_none() {
        Err(EngineError::Cancelled)
    } else {
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(EngineError::Cancelled),
            result = tokio::time::timeout(inner.config.job_deadline(), drive(&inner, job_id, &ctx)) => {
                match result {
                    Ok(r) => r,
                    Err(_) => Err(EngineError::DeadlineExceeded),
                }
            }
        }
    };

    // Compensate any vector upsert that never got its document write.
    if outcome.is_err() {
        let orphan = ctx.uncommitted_vector.lock().unwrap().take();
        if let Some(orphan_id) = orphan {
            if let Err(e) = inner.vector.delete(orphan_id).await {
                warn!(job_id = %job_id, id = %orphan_id, error = %e, "compensating vector delete failed");
            }
        }
    }

    let (terminal_state, job_error) = match &outcome {
        Ok(company_id) => {
            info!(job_id = %job_id, company_id = %company_id, "research completed");
            (JobState::Completed, None)
        }
        Err(EngineError::Cancelled) => (JobState::Cancelled, None),
        Err(e) => {
            warn!(job_id = %job_id, kind = e.kind(), error = %e, "research failed");
            (
                JobState::Failed,
                Some(JobError {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }),
            )
        }
    };

    {
        let mut job = ctx.job.write().await;
        job.transition(terminal_state);
        job.error = job_error.clone();
        if let Ok(company_id) = &outcome {
            job.company_id = Some(*company_id);
        }
    }
    let _ = ctx.state_tx.send(terminal_state);

    inner.canonical_inflight.lock().unwrap().remove(&canonical);
    inner.bus.terminal(job_id, terminal_state, job_error);
}

fn job_context(inner: &OrchestratorInner, job_id: JobId) -> Option<JobContext> {
    let jobs = inner.jobs.read().unwrap();
    let handle = jobs.get(&job_id)?;
    Some(JobContext {
        job: Arc::clone(&handle.job),
        cancel: handle.cancel.clone(),
        state_tx: handle.state_tx.clone(),
        uncommitted_vector: Mutex::new(None),
    })
}

/// Advance the job state and publish the phase boundary.
async fn enter_phase(
    inner: &OrchestratorInner,
    ctx: &JobContext,
    job_id: JobId,
    state: JobState,
    phase: Phase,
    message: &str,
) {
    ctx.job.write().await.transition(state);
    let _ = ctx.state_tx.send(state);
    inner.bus.progress(job_id, phase, message, None, None);
}

/// The four phases plus commit. Returns the company id on success.
async fn drive(
    inner: &OrchestratorInner,
    job_id: JobId,
    ctx: &JobContext,
) -> Result<CompanyId> {
    let (name, website) = {
        let job = ctx.job.read().await;
        (job.company_name.clone(), job.website.clone())
    };

    // Phase 1: link discovery.
    let phase_started = Instant::now();
    enter_phase(inner, ctx, job_id, JobState::Discovering, Phase::Discovery, "enumerating candidate pages").await;
    let candidates = inner.discoverer.discover(&website, &ctx.cancel).await?;
    inner.bus.progress(
        job_id,
        Phase::Discovery,
        format!("{} candidate pages discovered", candidates.len()),
        Some(candidates.len()),
        None,
    );
    let discovery_wall = phase_started.elapsed();

    // Phase 2: LLM page selection.
    let phase_started = Instant::now();
    enter_phase(inner, ctx, job_id, JobState::Selecting, Phase::Selection, "ranking pages").await;
    let selection = inner.selector.select(&name, &candidates, &ctx.cancel).await?;
    {
        let mut job = ctx.job.write().await;
        job.metrics.record(Phase::Selection, selection.usage.clone());
    }
    inner.bus.progress(
        job_id,
        Phase::Selection,
        format!("{} pages selected", selection.urls.len()),
        Some(selection.urls.len()),
        Some(candidates.len()),
    );
    let selection_wall = phase_started.elapsed();

    // Phase 3: parallel fetch.
    let phase_started = Instant::now();
    enter_phase(inner, ctx, job_id, JobState::Fetching, Phase::Fetch, "fetching selected pages").await;
    let total = selection.urls.len();
    let bus = Arc::clone(&inner.bus);
    let outcomes = inner
        .fetcher
        .fetch_all(&selection.urls, &ctx.cancel, move |done, _| {
            bus.progress(
                job_id,
                Phase::Fetch,
                format!("{done}/{total} pages fetched"),
                Some(done),
                Some(total),
            );
        })
        .await;
    if ctx.cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let mut pages = Vec::new();
    let mut first_failure = None;
    for outcome in outcomes {
        match outcome {
            FetchOutcome::Success(page) => pages.push(page),
            FetchOutcome::Failed { failure, .. } => {
                first_failure.get_or_insert(failure);
            }
        }
    }
    if pages.is_empty() {
        return Err(EngineError::NoPagesFetched {
            first_failure: first_failure.unwrap_or(crate::error::FetchFailure::Network(
                "no URLs were fetched".into(),
            )),
        });
    }
    let fetched_urls: Vec<String> = pages.iter().map(|p| p.url.clone()).collect();
    let fetch_wall = phase_started.elapsed();

    // Phase 4: aggregation.
    let phase_started = Instant::now();
    enter_phase(inner, ctx, job_id, JobState::Aggregating, Phase::Aggregation, "synthesizing profile").await;
    let output = inner.aggregator.aggregate(&name, &pages, &ctx.cancel).await?;
    {
        let mut job = ctx.job.write().await;
        job.metrics.record(Phase::Aggregation, output.usage.clone());
    }
    let aggregation_wall = phase_started.elapsed();

    // Reuse the existing id for this canonical company so re-research
    // replaces rather than duplicates.
    let canonical = canonical_key(&name, &website);
    let existing = inner.docs.find_by_canonical(&canonical).await?;
    let company_id = existing.as_ref().map(|c| c.id).unwrap_or_default();

    let low_quality = output.partial || output.profile.is_empty();

    let mut company = Company {
        id: company_id,
        name: name.clone(),
        website: website.clone(),
        profile: output.profile,
        embedding_text: output.embedding_text,
        embedding: Vec::new(),
        low_quality,
        provenance: Provenance::default(),
    };

    // Embedding-text hash stable across re-research: reuse the stored
    // vector and skip the upsert entirely.
    let unchanged = existing
        .as_ref()
        .map(|e| e.embedding_text_hash() == company.embedding_text_hash() && !e.embedding.is_empty())
        .unwrap_or(false);

    let mut embed_usage = crate::types::PhaseUsage::default();
    if unchanged {
        company.embedding = existing.as_ref().map(|e| e.embedding.clone()).unwrap_or_default();
        info!(job_id = %job_id, "embedding text unchanged, skipping upsert");
    } else {
        let embedding = tokio::time::timeout(
            inner.config.embed_timeout(),
            inner.llm.embed(&company.embedding_text, &inner.config.embedding_model),
        )
        .await
        .map_err(|_| crate::error::LlmError::Timeout)?
        .map_err(EngineError::from)?;
        embedding.meter(
            &mut embed_usage,
            inner.config.rates_for(&inner.config.embedding_model),
        );

        if embedding.dim != inner.vector.dimension() {
            return Err(crate::error::PersistenceError::DimensionMismatch {
                expected: inner.vector.dimension(),
                actual: embedding.dim,
            }
            .into());
        }
        company.embedding = embedding.vector;
    }

    // Provenance and metrics.
    {
        let mut job = ctx.job.write().await;
        job.metrics.record(Phase::Commit, embed_usage);
        company.provenance = Provenance {
            crawled_at: Some(Utc::now()),
            fetched_urls,
            input_tokens: job.metrics.total_input_tokens(),
            output_tokens: job.metrics.total_output_tokens(),
            estimated_cost: job.metrics.total_cost(),
            phase_durations_ms: vec![
                ("discovery".into(), discovery_wall.as_millis() as u64),
                ("selection".into(), selection_wall.as_millis() as u64),
                ("fetch".into(), fetch_wall.as_millis() as u64),
                ("aggregation".into(), aggregation_wall.as_millis() as u64),
            ],
        };
    }

    commit(inner, ctx, job_id, &company, unchanged).await?;
    Ok(company.id)
}

/// Commit ordering: (1) vector upsert, (2) document write, (3) completed.
/// A document failure after the upsert triggers a compensating vector
/// delete so no partial persistence survives a failed job.
async fn commit(
    inner: &OrchestratorInner,
    ctx: &JobContext,
    job_id: JobId,
    company: &Company,
    skip_upsert: bool,
) -> Result<()> {
    inner.bus.progress(job_id, Phase::Commit, "persisting profile", None, None);

    if !skip_upsert {
        let record = vector_record_for(company, &inner.config.embedding_model);
        let vector_write = async {
            match inner.vector.upsert(record.clone()).await {
                Ok(()) => Ok(()),
                Err(crate::error::PersistenceError::DimensionMismatch { expected, actual }) => {
                    Err(crate::error::PersistenceError::DimensionMismatch { expected, actual })
                }
                Err(first) => {
                    // One retry for transient store failures.
                    warn!(job_id = %job_id, error = %first, "vector upsert failed, retrying once");
                    inner.vector.upsert(record.clone()).await.map_err(|e| {
                        crate::error::PersistenceError::UpsertFailed(e.to_string())
                    })
                }
            }
        };
        tokio::time::timeout(inner.config.vector_timeout(), vector_write)
            .await
            .map_err(|_| crate::error::PersistenceError::UpsertFailed("vector store timeout".into()))??;

        *ctx.uncommitted_vector.lock().unwrap() = Some(company.id);
    }

    if let Err(e) = inner.docs.put(company).await {
        // Only a vector this job wrote gets compensated; a reused record
        // from a prior completed job must survive the failure.
        if skip_upsert {
            warn!(job_id = %job_id, error = %e, "document write failed, prior vector record kept");
        } else {
            warn!(job_id = %job_id, error = %e, "document write failed, compensating vector delete");
            if let Err(delete_err) = inner.vector.delete(company.id).await {
                warn!(job_id = %job_id, error = %delete_err, "compensating delete also failed");
            }
            *ctx.uncommitted_vector.lock().unwrap() = None;
        }
        return Err(crate::error::PersistenceError::DocumentStoreFailed(e.to_string()).into());
    }

    *ctx.uncommitted_vector.lock().unwrap() = None;
    Ok(())
}

/// Project a company onto the declared vector metadata schema.
fn vector_record_for(company: &Company, embedding_model: &str) -> VectorRecord {
    let mut metadata = indexmap::IndexMap::new();
    metadata.insert("name".to_string(), MetadataValue::from(company.name.clone()));
    if let Some(industry) = &company.profile.industry {
        metadata.insert("industry".to_string(), MetadataValue::from(industry.clone()));
    }
    if let Some(model) = &company.profile.business_model {
        let label = serde_json::to_value(model)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        metadata.insert("business_model".to_string(), MetadataValue::from(label));
    }
    if let Some(stage) = &company.profile.stage {
        let label = serde_json::to_value(stage)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        metadata.insert("stage".to_string(), MetadataValue::from(label));
    }
    if let Some(scope) = &company.profile.geographic_scope {
        let label = serde_json::to_value(scope)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        metadata.insert("geographic_scope".to_string(), MetadataValue::from(label));
    }
    metadata.insert(
        "has_leadership".to_string(),
        MetadataValue::from(!company.profile.leadership.is_empty()),
    );
    metadata.insert(
        "services_count".to_string(),
        MetadataValue::from(company.profile.key_services.len() as f64),
    );
    metadata.insert("low_quality".to_string(), MetadataValue::from(company.low_quality));
    metadata.insert(
        "embedding_model".to_string(),
        MetadataValue::from(embedding_model),
    );
    metadata.insert(
        "updated_at".to_string(),
        MetadataValue::from(Utc::now().to_rfc3339()),
    );

    VectorRecord {
        id: company.id,
        vector: company.embedding.clone(),
        metadata,
    }
}
