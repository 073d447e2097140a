//! The generation pipeline executed inside one job.
//!
//! The compliance gate runs first; a failing gate aborts before the
//! session source or the signing authority is ever touched. The remaining
//! stages draw read-only data, assemble the canonical package, and seal
//! it.

use crate::config::ServiceConfig;
use attest_coverage::gate_failures;
use attest_inventory::InventorySeed;
use attest_jobs::{FailureStage, JobFailure};
use attest_replay::{filter_deviations, ReplayError, SessionReplayer};
use attest_seal::{assemble, PackageMeta, RetryPolicy, SealError, SealedPackage, Sealer};
use attest_types::{SessionId, TraceabilityMatrix};
use chrono::Utc;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) struct PipelineInput {
    pub matrix: TraceabilityMatrix,
    pub seed: InventorySeed,
    pub agent_version: String,
    pub generated_by: String,
}

/// Run one generation pipeline to a sealed package.
pub(crate) async fn run(
    input: PipelineInput,
    config: ServiceConfig,
    replayer: Arc<SessionReplayer>,
    sealer: Arc<Sealer>,
) -> Result<SealedPackage, JobFailure> {
    // Gate check before anything else; a non-compliant agent must never
    // reach the event store or the signing authority.
    let failing = gate_failures(&input.matrix, config.strict_mode);
    if !failing.is_empty() {
        return Err(JobFailure::compliance(failing));
    }
    info!(
        overall_status = %input.matrix.overall_status,
        agent_version = %input.agent_version,
        "compliance gate passed"
    );

    let inventory = attest_inventory::assemble(&input.seed);
    let model_identity = attest_inventory::model_identity(&input.seed);

    // The event sweep and the config trail are independent reads.
    let retry = config.external_retry();
    let (events, config_changes) = tokio::join!(
        fetch_with_retry(&retry, || replayer.deviation_events(&input.agent_version)),
        fetch_with_retry(&retry, || replayer.config_changes(None)),
    );
    let events = events.map_err(source_failure)?;
    let config_changes = config_changes.map_err(source_failure)?;

    let report = filter_deviations(&events, config.risk_threshold, Some(config.max_deviations));

    let deviating_sessions: BTreeSet<SessionId> = report
        .events
        .iter()
        .map(|event| event.session_id.clone())
        .collect();
    let session_ids: Vec<SessionId> = deviating_sessions.into_iter().collect();
    let (narratives, overlay_warnings) =
        fetch_with_retry(&retry, || replayer.narratives(&session_ids))
            .await
            .map_err(source_failure)?;
    for warning in &overlay_warnings {
        warn!("{warning}");
    }

    let meta = PackageMeta {
        agent_version: input.agent_version,
        model_identity,
        generated_at: Utc::now(),
        generated_by: input.generated_by,
    };
    let (package, _canonical) = assemble(
        meta,
        inventory,
        input.matrix,
        report.events,
        report.human_intervention_count,
        narratives,
        config_changes,
    )
    .map_err(seal_failure)?;

    sealer.seal(package).await.map_err(seal_failure)
}

/// Retry a read against the session source with bounded exponential
/// backoff. Only source outages are retried; decryption rejections are
/// handled inline by `decrypt_safe`.
async fn fetch_with_retry<T, F, Fut>(policy: &RetryPolicy, mut fetch: F) -> Result<T, ReplayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ReplayError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match fetch().await {
            Ok(value) => return Ok(value),
            Err(err @ ReplayError::Source(_)) if attempt < policy.max_attempts => {
                warn!(attempt, error = %err, "session source read failed, backing off");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(err) => return Err(err),
        }
    }
}

fn source_failure(err: ReplayError) -> JobFailure {
    JobFailure::new(FailureStage::SessionSource, err.to_string())
}

fn seal_failure(err: SealError) -> JobFailure {
    let stage = match err {
        SealError::ExternalService(_) => FailureStage::Signing,
        SealError::Integrity { .. } => FailureStage::Integrity,
        _ => FailureStage::Internal,
    };
    JobFailure::new(stage, err.to_string())
}
