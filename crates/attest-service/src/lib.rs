//! Attest Service - the outward face of audit package generation.
//!
//! Submission validates the declared inputs synchronously, then runs the
//! generation pipeline as an isolated job: compliance gate, inventory,
//! deviation sweep, session narratives, canonical assembly, sealing.
//! Callers poll job state and retrieve export artifacts once the job
//! completes. The gate decision travels inside the sealed package
//! (`matrix.overall_status`), so a release pipeline can branch on it
//! without re-deriving anything.

#![deny(unsafe_code)]

pub mod config;
mod pipeline;
pub mod render;

pub use config::ServiceConfig;
pub use render::{ArtifactRenderer, CanonicalJsonRenderer, ExportFormat, RenderError};

use attest_coverage::{build_matrix, CoverageError};
use attest_inventory::InventorySeed;
use attest_jobs::{JobError, JobFailure, JobId, JobManager, JobStatus, JobStore};
use attest_replay::{FieldDecryptor, SessionReplayer, SessionSource};
use attest_seal::{SealedPackage, Sealer, SigningAuthority};
use attest_types::{CoverageLink, Requirement, TestResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

/// Service-level errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or referentially inconsistent submission. Surfaced
    /// synchronously; no job is scheduled.
    #[error("invalid submission: {0}")]
    Validation(String),

    #[error("unknown job: {0}")]
    UnknownJob(JobId),

    /// The job exists but has not completed yet.
    #[error("job {0} is not complete")]
    NotReady(JobId),

    /// The job reached `Failed`; the structured failure says which stage
    /// aborted.
    #[error("job {0} failed: {1}")]
    Failed(JobId, JobFailure),

    #[error("unsupported export format: {0}")]
    UnsupportedFormat(ExportFormat),

    #[error("render failed: {0}")]
    Render(String),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl From<CoverageError> for ServiceError {
    fn from(err: CoverageError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// The three structured inputs of one generation run, plus run identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmissionInput {
    pub requirements: Vec<Requirement>,
    pub coverage_links: Vec<CoverageLink>,
    pub test_results: Vec<TestResult>,
    pub inventory: InventorySeed,
    pub agent_version: String,
    /// Identity recorded as `generated_by`; the configured default
    /// applies when absent.
    #[serde(default)]
    pub generated_by: Option<String>,
}

/// Snapshot of a job's externally visible state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatusView {
    pub id: JobId,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<JobFailure>,
}

/// The audit service facade. All external capabilities are injected.
pub struct AuditService {
    config: ServiceConfig,
    replayer: Arc<SessionReplayer>,
    sealer: Arc<Sealer>,
    jobs: JobManager<SealedPackage>,
    renderers: HashMap<ExportFormat, Arc<dyn ArtifactRenderer>>,
}

impl AuditService {
    pub fn new(
        config: ServiceConfig,
        source: Arc<dyn SessionSource>,
        decryptor: Arc<dyn FieldDecryptor>,
        authority: Arc<dyn SigningAuthority>,
        store: Arc<dyn JobStore<SealedPackage>>,
    ) -> Self {
        let sealer = Sealer::new(authority).with_retry(config.external_retry());
        let jobs = JobManager::new(store, config.job_budget());
        Self {
            replayer: Arc::new(SessionReplayer::new(source, decryptor)),
            sealer: Arc::new(sealer),
            jobs,
            renderers: HashMap::new(),
            config,
        }
    }

    /// Register a renderer for an export format.
    pub fn with_renderer(
        mut self,
        format: ExportFormat,
        renderer: Arc<dyn ArtifactRenderer>,
    ) -> Self {
        self.renderers.insert(format, renderer);
        self
    }

    /// Validate a submission and schedule its generation job.
    ///
    /// Referential inconsistencies fail here, synchronously — the job is
    /// never created. The compliance gate itself runs inside the job: a
    /// gate failure is the expected outcome of auditing a non-compliant
    /// agent, not a submission defect.
    #[instrument(skip(self, input), fields(agent_version = %input.agent_version))]
    pub async fn submit(&self, input: SubmissionInput) -> Result<JobId, ServiceError> {
        if input.agent_version.trim().is_empty() {
            return Err(ServiceError::Validation("agent_version is empty".to_string()));
        }
        if input.inventory.model_name.trim().is_empty() {
            return Err(ServiceError::Validation("model_name is empty".to_string()));
        }
        if input.inventory.model_sha.trim().is_empty() {
            return Err(ServiceError::Validation("model_sha is empty".to_string()));
        }

        let matrix = build_matrix(&input.requirements, &input.test_results, &input.coverage_links)?;

        let pipeline_input = pipeline::PipelineInput {
            matrix,
            seed: input.inventory,
            agent_version: input.agent_version,
            generated_by: input
                .generated_by
                .unwrap_or_else(|| self.config.default_generated_by.clone()),
        };
        let job_id = self
            .jobs
            .submit(pipeline::run(
                pipeline_input,
                self.config.clone(),
                Arc::clone(&self.replayer),
                Arc::clone(&self.sealer),
            ))
            .await?;

        info!(job = %job_id, "audit package generation submitted");
        Ok(job_id)
    }

    /// Current state of a job. Side-effect free.
    pub async fn poll(&self, id: &JobId) -> Result<JobStatusView, ServiceError> {
        let record = self
            .jobs
            .poll(id)
            .await?
            .ok_or(ServiceError::UnknownJob(*id))?;
        Ok(JobStatusView {
            id: record.id,
            status: record.status,
            submitted_at: record.submitted_at,
            completed_at: record.completed_at,
            error: record.error,
        })
    }

    /// The sealed package of a completed job.
    pub async fn package(&self, id: &JobId) -> Result<SealedPackage, ServiceError> {
        let record = self
            .jobs
            .poll(id)
            .await?
            .ok_or(ServiceError::UnknownJob(*id))?;
        match record.status {
            JobStatus::Completed => record
                .result
                .ok_or_else(|| ServiceError::Render("completed job lost its result".to_string())),
            JobStatus::Failed => Err(ServiceError::Failed(
                *id,
                record
                    .error
                    .unwrap_or_else(|| JobFailure::new(attest_jobs::FailureStage::Internal, "unknown")),
            )),
            JobStatus::Pending | JobStatus::Running => Err(ServiceError::NotReady(*id)),
        }
    }

    /// Render a completed job's package into the requested export format.
    ///
    /// Retrieval before completion fails with [`ServiceError::NotReady`],
    /// distinctly from [`ServiceError::UnknownJob`].
    #[instrument(skip(self))]
    pub async fn artifact(&self, id: &JobId, format: ExportFormat) -> Result<Vec<u8>, ServiceError> {
        let renderer = self
            .renderers
            .get(&format)
            .ok_or(ServiceError::UnsupportedFormat(format))?;
        let package = self.package(id).await?;
        renderer
            .render(&package)
            .map_err(|err| ServiceError::Render(err.to_string()))
    }

    /// Best-effort cancellation; see [`JobManager::cancel`].
    pub async fn cancel(&self, id: &JobId) -> Result<bool, ServiceError> {
        Ok(self.jobs.cancel(id).await?)
    }
}
