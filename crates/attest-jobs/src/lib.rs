//! Attest Jobs - isolated asynchronous units of work with a pollable
//! state machine.
//!
//! Each job owns exactly one pipeline execution. Jobs never share mutable
//! state; the store is injected and keyed by job id, and polling reads the
//! current state without side effects. Transitions are monotonic:
//! `Pending -> Running -> {Completed, Failed}`, and terminal states have
//! no outgoing transition.

#![deny(unsafe_code)]

use async_trait::async_trait;
use attest_types::RequirementId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Unique identifier of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub uuid::Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Which pipeline stage aborted a failed job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureStage {
    Validation,
    ComplianceGate,
    SessionSource,
    Signing,
    Integrity,
    Timeout,
    Cancelled,
    Internal,
}

/// Structured failure attached to a job record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub stage: FailureStage,
    pub message: String,
    /// Populated for compliance-gate failures: the requirement ids that
    /// blocked sealing.
    pub failing_requirements: Vec<RequirementId>,
}

impl JobFailure {
    pub fn new(stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            failing_requirements: Vec::new(),
        }
    }

    pub fn compliance(failing: Vec<RequirementId>) -> Self {
        let ids: Vec<String> = failing.iter().map(|id| id.0.clone()).collect();
        Self {
            stage: FailureStage::ComplianceGate,
            message: format!("critical requirements not satisfied: [{}]", ids.join(", ")),
            failing_requirements: failing,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.stage, self.message)
    }
}

/// One job: a single pipeline execution and its outcome.
#[derive(Clone, Debug)]
pub struct JobRecord<R> {
    pub id: JobId,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<JobFailure>,
    pub result: Option<R>,
}

impl<R> JobRecord<R> {
    fn new(id: JobId, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            submitted_at,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }
}

/// Store and transition errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// Injected persistence for job records. No global registry exists; every
/// manager owns its store handle.
#[async_trait]
pub trait JobStore<R>: Send + Sync {
    async fn insert(&self, record: JobRecord<R>) -> Result<(), JobError>;

    /// Side-effect-free read of the current record.
    async fn get(&self, id: &JobId) -> Result<Option<JobRecord<R>>, JobError>;

    async fn mark_running(&self, id: &JobId, at: DateTime<Utc>) -> Result<(), JobError>;

    async fn complete(&self, id: &JobId, result: R, at: DateTime<Utc>) -> Result<(), JobError>;

    async fn fail(&self, id: &JobId, failure: JobFailure, at: DateTime<Utc>)
        -> Result<(), JobError>;
}

/// In-memory job store.
pub struct InMemoryJobStore<R> {
    jobs: RwLock<HashMap<JobId, JobRecord<R>>>,
}

impl<R> InMemoryJobStore<R> {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl<R> Default for InMemoryJobStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Clone + Send + Sync + 'static> JobStore<R> for InMemoryJobStore<R> {
    async fn insert(&self, record: JobRecord<R>) -> Result<(), JobError> {
        self.jobs.write().await.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord<R>>, JobError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn mark_running(&self, id: &JobId, at: DateTime<Utc>) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;
        if record.status != JobStatus::Pending {
            return Err(JobError::InvalidTransition {
                from: record.status,
                to: JobStatus::Running,
            });
        }
        record.status = JobStatus::Running;
        record.started_at = Some(at);
        Ok(())
    }

    async fn complete(&self, id: &JobId, result: R, at: DateTime<Utc>) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;
        if record.status != JobStatus::Running {
            return Err(JobError::InvalidTransition {
                from: record.status,
                to: JobStatus::Completed,
            });
        }
        record.status = JobStatus::Completed;
        record.completed_at = Some(at);
        record.result = Some(result);
        Ok(())
    }

    async fn fail(
        &self,
        id: &JobId,
        failure: JobFailure,
        at: DateTime<Utc>,
    ) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(id).ok_or(JobError::NotFound(*id))?;
        if record.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                from: record.status,
                to: JobStatus::Failed,
            });
        }
        record.status = JobStatus::Failed;
        record.completed_at = Some(at);
        record.error = Some(failure);
        Ok(())
    }
}

/// Runs pipelines as independent tokio tasks against an injected store.
pub struct JobManager<R> {
    store: Arc<dyn JobStore<R>>,
    budget: Duration,
    handles: RwLock<HashMap<JobId, JoinHandle<()>>>,
}

impl<R: Clone + Send + Sync + 'static> JobManager<R> {
    /// `budget` is the wall-clock limit for one pipeline execution.
    pub fn new(store: Arc<dyn JobStore<R>>, budget: Duration) -> Self {
        Self {
            store,
            budget,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Submit a pipeline for execution. Returns immediately with the job
    /// id; the submitter polls for completion.
    pub async fn submit<F>(&self, pipeline: F) -> Result<JobId, JobError>
    where
        F: Future<Output = Result<R, JobFailure>> + Send + 'static,
    {
        let id = JobId::generate();
        self.store.insert(JobRecord::new(id, Utc::now())).await?;

        let store = Arc::clone(&self.store);
        let budget = self.budget;
        let handle = tokio::spawn(async move {
            if let Err(err) = store.mark_running(&id, Utc::now()).await {
                // A cancel can land before the task starts; nothing to run.
                warn!(job = %id, error = %err, "job did not start");
                return;
            }

            let outcome = match tokio::time::timeout(budget, pipeline).await {
                Ok(result) => result,
                Err(_) => Err(JobFailure::new(
                    FailureStage::Timeout,
                    format!("job exceeded wall-clock budget of {budget:?}"),
                )),
            };

            let transition = match outcome {
                Ok(result) => store.complete(&id, result, Utc::now()).await,
                Err(failure) => {
                    info!(job = %id, %failure, "job failed");
                    store.fail(&id, failure, Utc::now()).await
                }
            };
            if let Err(err) = transition {
                // Lost the race against a cancel; the terminal state wins.
                warn!(job = %id, error = %err, "terminal transition rejected");
            }
        });

        self.handles.write().await.insert(id, handle);
        info!(job = %id, "job submitted");
        Ok(id)
    }

    /// Read the current state of a job. No side effects.
    pub async fn poll(&self, id: &JobId) -> Result<Option<JobRecord<R>>, JobError> {
        self.store.get(id).await
    }

    /// Best-effort cancellation: abort the task and mark the job failed.
    /// Partial work is discarded, never exposed as a result. Returns
    /// `false` when the job had already reached a terminal state.
    pub async fn cancel(&self, id: &JobId) -> Result<bool, JobError> {
        let handle = self.handles.write().await.remove(id);
        if let Some(handle) = handle {
            handle.abort();
        }

        match self
            .store
            .fail(
                id,
                JobFailure::new(FailureStage::Cancelled, "cancelled by caller"),
                Utc::now(),
            )
            .await
        {
            Ok(()) => Ok(true),
            Err(JobError::InvalidTransition { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn manager(budget_ms: u64) -> JobManager<String> {
        JobManager::new(Arc::new(InMemoryJobStore::new()), Duration::from_millis(budget_ms))
    }

    async fn wait_terminal(manager: &JobManager<String>, id: &JobId) -> JobRecord<String> {
        for _ in 0..200 {
            let record = manager.poll(id).await.unwrap().unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} did not reach a terminal state");
    }

    #[tokio::test]
    async fn submit_and_complete() {
        let manager = manager(1_000);
        let id = manager
            .submit(async { Ok("Success".to_string()) })
            .await
            .unwrap();

        let record = wait_terminal(&manager, &id).await;
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.result.as_deref(), Some("Success"));
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn failing_pipeline_marks_failed() {
        let manager = manager(1_000);
        let id = manager
            .submit(async {
                Err::<String, _>(JobFailure::new(FailureStage::Internal, "task failed on purpose"))
            })
            .await
            .unwrap();

        let record = wait_terminal(&manager, &id).await;
        assert_eq!(record.status, JobStatus::Failed);
        let failure = record.error.unwrap();
        assert_eq!(failure.stage, FailureStage::Internal);
        assert!(failure.message.contains("task failed on purpose"));
        assert!(record.result.is_none());
    }

    #[tokio::test]
    async fn budget_overrun_fails_with_timeout() {
        let manager = manager(20);
        let id = manager
            .submit(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("too late".to_string())
            })
            .await
            .unwrap();

        let record = wait_terminal(&manager, &id).await;
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.unwrap().stage, FailureStage::Timeout);
    }

    #[tokio::test]
    async fn cancel_discards_partial_work() {
        let manager = manager(10_000);
        let id = manager
            .submit(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok("never".to_string())
            })
            .await
            .unwrap();

        // Give the task a chance to start.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.cancel(&id).await.unwrap());

        let record = wait_terminal(&manager, &id).await;
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.unwrap().stage, FailureStage::Cancelled);
        assert!(record.result.is_none());
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let manager = manager(1_000);
        let id = manager.submit(async { Ok("done".to_string()) }).await.unwrap();
        let record = wait_terminal(&manager, &id).await;
        assert_eq!(record.status, JobStatus::Completed);

        assert!(!manager.cancel(&id).await.unwrap());
        let record = manager.poll(&id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn poll_unknown_job_returns_none() {
        let manager = manager(1_000);
        assert!(manager.poll(&JobId::generate()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_jobs_do_not_interfere() {
        let manager = manager(1_000);
        let slow = manager
            .submit(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok("slow".to_string())
            })
            .await
            .unwrap();
        let fast = manager.submit(async { Ok("fast".to_string()) }).await.unwrap();

        let fast_record = wait_terminal(&manager, &fast).await;
        assert_eq!(fast_record.result.as_deref(), Some("fast"));

        let slow_record = wait_terminal(&manager, &slow).await;
        assert_eq!(slow_record.result.as_deref(), Some("slow"));
    }

    #[derive(Debug, Clone)]
    enum StoreOp {
        Run,
        Complete,
        Fail,
    }

    fn op_strategy() -> impl Strategy<Value = Vec<StoreOp>> {
        proptest::collection::vec(
            prop_oneof![Just(StoreOp::Run), Just(StoreOp::Complete), Just(StoreOp::Fail)],
            0..16,
        )
    }

    proptest! {
        // Terminal states are absorbing: no sequence of transitions moves
        // a job out of Completed or Failed, and rejected transitions
        // leave the record untouched.
        #[test]
        fn property_transitions_are_monotonic(ops in op_strategy()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            rt.block_on(async move {
                let store: InMemoryJobStore<String> = InMemoryJobStore::new();
                let id = JobId::generate();
                store.insert(JobRecord::new(id, Utc::now())).await.unwrap();

                let mut terminal_seen: Option<JobStatus> = None;
                for op in ops {
                    let result = match op {
                        StoreOp::Run => store.mark_running(&id, Utc::now()).await,
                        StoreOp::Complete => {
                            store.complete(&id, "done".to_string(), Utc::now()).await
                        }
                        StoreOp::Fail => {
                            store
                                .fail(
                                    &id,
                                    JobFailure::new(FailureStage::Internal, "prop"),
                                    Utc::now(),
                                )
                                .await
                        }
                    };

                    let status = store.get(&id).await.unwrap().unwrap().status;
                    if let Some(terminal) = terminal_seen {
                        // Once terminal, the status never changes again.
                        assert_eq!(status, terminal);
                        assert!(result.is_err());
                    } else if status.is_terminal() {
                        terminal_seen = Some(status);
                    }
                }
            });
        }
    }
}
