//! Deviation filtering: selects above-threshold risk events and tallies
//! human interventions.

use attest_types::{DeviationEvent, DeviationKind, RiskLevel};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Output of the deviation filter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviationReport {
    /// Events with `risk_level >= threshold`, original order preserved.
    pub events: Vec<DeviationEvent>,
    /// Count of all intervention events, independent of the threshold.
    pub human_intervention_count: u64,
    /// Whether the event list was capped at the configured maximum.
    pub truncated: bool,
}

/// Filter `events` against `threshold`.
///
/// Ordering is stable: retained events keep their original relative
/// positions. Intervention events are always counted, even below the
/// threshold; they appear in the retained list only when they also meet
/// it. `max_events` caps the list, never the count.
pub fn filter_deviations(
    events: &[DeviationEvent],
    threshold: RiskLevel,
    max_events: Option<usize>,
) -> DeviationReport {
    let human_intervention_count = events
        .iter()
        .filter(|event| event.kind == DeviationKind::Intervention)
        .count() as u64;

    let mut retained: Vec<DeviationEvent> = events
        .iter()
        .filter(|event| event.risk_level >= threshold)
        .cloned()
        .collect();

    let truncated = match max_events {
        Some(cap) if retained.len() > cap => {
            retained.truncate(cap);
            true
        }
        _ => false,
    };

    debug!(
        retained = retained.len(),
        interventions = human_intervention_count,
        truncated,
        %threshold,
        "deviation filter applied"
    );

    DeviationReport {
        events: retained,
        human_intervention_count,
        truncated,
    }
}
