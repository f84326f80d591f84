//! Research job lifecycle types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::company::CompanyId;

/// Opaque job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Job state machine.
///
/// Transitions run forward along
/// `queued → discovering → selecting → fetching → aggregating → completed`;
/// any non-terminal state may move to `failed` or `cancelled`. Terminal
/// states never transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Discovering,
    Selecting,
    Fetching,
    Aggregating,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self → next` is in the allowed transition set.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Failed | Self::Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Self::Queued, Self::Discovering)
                | (Self::Queued, Self::Completed)
                | (Self::Discovering, Self::Selecting)
                | (Self::Selecting, Self::Fetching)
                | (Self::Fetching, Self::Aggregating)
                | (Self::Aggregating, Self::Completed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Discovering => "discovering",
            Self::Selecting => "selecting",
            Self::Fetching => "fetching",
            Self::Aggregating => "aggregating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Pipeline phase, for progress events and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Selection,
    Fetch,
    Aggregation,
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovery => "discovery",
            Self::Selection => "selection",
            Self::Fetch => "fetch",
            Self::Aggregation => "aggregation",
            Self::Commit => "commit",
        };
        f.write_str(s)
    }
}

/// Token and cost accounting for one phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseUsage {
    pub llm_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost: f64,
    pub wall_ms: u64,
}

impl PhaseUsage {
    /// Fold a single model call into the phase totals.
    pub fn record_call(&mut self, input_tokens: u64, output_tokens: u64, cost: f64) {
        self.llm_calls += 1;
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.estimated_cost += cost;
    }

    pub fn record_wall(&mut self, duration: Duration) {
        self.wall_ms += duration.as_millis() as u64;
    }

    /// Merge another usage record into this one.
    pub fn absorb(&mut self, other: &PhaseUsage) {
        self.llm_calls += other.llm_calls;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.estimated_cost += other.estimated_cost;
        self.wall_ms += other.wall_ms;
    }
}

/// Aggregated metrics for a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetrics {
    #[serde(default)]
    pub phases: Vec<(Phase, PhaseUsage)>,
}

impl JobMetrics {
    pub fn record(&mut self, phase: Phase, usage: PhaseUsage) {
        self.phases.push((phase, usage));
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.phases.iter().map(|(_, u)| u.input_tokens).sum()
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.phases.iter().map(|(_, u)| u.output_tokens).sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.phases.iter().map(|(_, u)| u.estimated_cost).sum()
    }

    pub fn total_llm_calls(&self) -> u32 {
        self.phases.iter().map(|(_, u)| u.llm_calls).sum()
    }

    pub fn usage_for(&self, phase: Phase) -> PhaseUsage {
        let mut total = PhaseUsage::default();
        for (p, u) in &self.phases {
            if *p == phase {
                total.absorb(u);
            }
        }
        total
    }
}

/// Error details carried on a failed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Stable machine-readable kind (see the error taxonomy).
    pub kind: String,

    /// End-user phrasing.
    pub message: String,
}

/// One execution of the research pipeline for one company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchJob {
    pub id: JobId,
    pub company_name: String,
    pub website: String,
    pub state: JobState,
    pub company_id: Option<CompanyId>,
    pub metrics: JobMetrics,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResearchJob {
    pub fn new(company_name: impl Into<String>, website: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            company_name: company_name.into(),
            website: website.into(),
            state: JobState::Queued,
            company_id: None,
            metrics: JobMetrics::default(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next` if the transition is allowed. Returns whether the
    /// transition happened; illegal transitions are ignored so a terminal
    /// state can never be overwritten by a racing phase.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                job_id = %self.id,
                from = %self.state,
                to = %next,
                "ignoring illegal job state transition"
            );
            return false;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_allowed() {
        let order = [
            JobState::Queued,
            JobState::Discovering,
            JobState::Selecting,
            JobState::Fetching,
            JobState::Aggregating,
            JobState::Completed,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [JobState::Completed, JobState::Failed, JobState::Cancelled] {
            for next in [
                JobState::Queued,
                JobState::Discovering,
                JobState::Failed,
                JobState::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn any_active_state_can_fail_or_cancel() {
        for state in [
            JobState::Queued,
            JobState::Discovering,
            JobState::Selecting,
            JobState::Fetching,
            JobState::Aggregating,
        ] {
            assert!(state.can_transition_to(JobState::Failed));
            assert!(state.can_transition_to(JobState::Cancelled));
        }
    }

    #[test]
    fn skipping_phases_is_illegal() {
        assert!(!JobState::Queued.can_transition_to(JobState::Fetching));
        assert!(!JobState::Discovering.can_transition_to(JobState::Aggregating));
    }

    #[test]
    fn job_transition_guards() {
        let mut job = ResearchJob::new("Acme", "https://acme.com");
        assert!(job.transition(JobState::Discovering));
        assert!(!job.transition(JobState::Aggregating));
        assert_eq!(job.state, JobState::Discovering);
        assert!(job.transition(JobState::Cancelled));
        assert!(!job.transition(JobState::Failed));
        assert_eq!(job.state, JobState::Cancelled);
    }

    #[test]
    fn metrics_accumulate() {
        let mut metrics = JobMetrics::default();
        let mut usage = PhaseUsage::default();
        usage.record_call(1000, 200, 0.012);
        usage.record_call(500, 100, 0.006);
        metrics.record(Phase::Aggregation, usage);

        assert_eq!(metrics.total_input_tokens(), 1500);
        assert_eq!(metrics.total_output_tokens(), 300);
        assert_eq!(metrics.total_llm_calls(), 2);
        assert!((metrics.total_cost() - 0.018).abs() < 1e-9);
    }
}
