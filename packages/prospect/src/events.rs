//! Progress and terminal events.
//!
//! Producers publish by job id; subscribers hold a broadcast receiver and
//! never a reference to any component's mutable state. Delivery is ordered
//! per job and best-effort: a subscriber that lags past the channel
//! capacity drops the oldest events.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{JobError, JobId, JobState, Phase};

/// A sub-phase progress update, e.g. "12/47 pages fetched".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub phase: Phase,
    pub message: String,
    pub current: Option<usize>,
    pub total: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

/// Emitted exactly once when a job reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalEvent {
    pub job_id: JobId,
    pub state: JobState,
    pub error: Option<JobError>,
    pub timestamp: DateTime<Utc>,
}

/// Either event kind, as carried on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress(ProgressEvent),
    Terminal(TerminalEvent),
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Progress(e) => e.job_id,
            Self::Terminal(e) => e.job_id,
        }
    }
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Thread-safe per-job event bus.
pub struct ProgressBus {
    channels: RwLock<HashMap<JobId, broadcast::Sender<JobEvent>>>,
    capacity: usize,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Register a job so events published before the first subscriber are
    /// not lost to a missing channel.
    pub fn register(&self, job_id: JobId) {
        let mut channels = self.channels.write().unwrap();
        channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
    }

    /// Subscribe to a job's events. Returns `None` for unknown jobs.
    pub fn subscribe(&self, job_id: JobId) -> Option<broadcast::Receiver<JobEvent>> {
        self.channels
            .read()
            .unwrap()
            .get(&job_id)
            .map(|tx| tx.subscribe())
    }

    /// Publish a progress event.
    pub fn progress(
        &self,
        job_id: JobId,
        phase: Phase,
        message: impl Into<String>,
        current: Option<usize>,
        total: Option<usize>,
    ) {
        let event = JobEvent::Progress(ProgressEvent {
            job_id,
            phase,
            message: message.into(),
            current,
            total,
            timestamp: Utc::now(),
        });
        self.publish(job_id, event);
    }

    /// Publish the terminal event and drop the channel. Subscribers holding
    /// receivers still drain buffered events after removal.
    pub fn terminal(&self, job_id: JobId, state: JobState, error: Option<JobError>) {
        let event = JobEvent::Terminal(TerminalEvent {
            job_id,
            state,
            error,
            timestamp: Utc::now(),
        });
        self.publish(job_id, event);
        self.channels.write().unwrap().remove(&job_id);
    }

    fn publish(&self, job_id: JobId, event: JobEvent) {
        let channels = self.channels.read().unwrap();
        if let Some(tx) = channels.get(&job_id) {
            // A send error just means no subscriber is listening right now.
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_delivered_in_publication_order() {
        let bus = ProgressBus::new();
        let job_id = JobId::new();
        bus.register(job_id);

        let mut rx = bus.subscribe(job_id).unwrap();

        for i in 0..5 {
            bus.progress(job_id, Phase::Fetch, format!("{i}/5 pages fetched"), Some(i), Some(5));
        }
        bus.terminal(job_id, JobState::Completed, None);

        for i in 0..5 {
            match rx.recv().await.unwrap() {
                JobEvent::Progress(e) => assert_eq!(e.current, Some(i)),
                other => panic!("expected progress, got {other:?}"),
            }
        }
        match rx.recv().await.unwrap() {
            JobEvent::Terminal(e) => assert_eq!(e.state, JobState::Completed),
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_job_has_no_channel() {
        let bus = ProgressBus::new();
        assert!(bus.subscribe(JobId::new()).is_none());
    }

    #[tokio::test]
    async fn terminal_removes_channel() {
        let bus = ProgressBus::new();
        let job_id = JobId::new();
        bus.register(job_id);
        bus.terminal(job_id, JobState::Failed, None);
        assert!(bus.subscribe(job_id).is_none());
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = ProgressBus::new();
        let job_id = JobId::new();
        bus.register(job_id);

        let mut rx1 = bus.subscribe(job_id).unwrap();
        let mut rx2 = bus.subscribe(job_id).unwrap();

        bus.progress(job_id, Phase::Discovery, "sitemap parsed", None, None);

        assert!(matches!(rx1.recv().await.unwrap(), JobEvent::Progress(_)));
        assert!(matches!(rx2.recv().await.unwrap(), JobEvent::Progress(_)));
    }
}
