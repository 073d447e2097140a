//! Canonical byte serialization of an audit package.
//!
//! The canonical form is the unique hash input for sealing. Encoding
//! rules: fields in the fixed order given by the view structs below,
//! compact JSON with no insignificant whitespace, timestamps as RFC 3339
//! UTC truncated to microseconds, enums as fixed uppercase/lowercase
//! tokens, and every set-like collection sorted by its natural key.
//! Deviation events keep their source order, which is part of their
//! meaning. The package id and the seal fields (`document_hash`,
//! `signature`, `signer_public_key`) identify or certify the record and
//! are excluded from its content.

use crate::sealer::SealError;
use attest_types::{
    AuditPackage, ComponentKind, ConfigChange, CoverageEntry, DeviationEvent, DeviationKind,
    InventoryComponent, Requirement, RequirementStatus, SessionNarrative, SessionTurn,
    TestOutcome, TestResult, TurnAnnotation, TurnPhase,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Serialize `package` into its canonical byte form.
pub fn canonical_bytes(package: &AuditPackage) -> Result<Vec<u8>, SealError> {
    let view = CanonicalPackage::from(package);
    serde_json::to_vec(&view).map_err(|err| SealError::Serialization(err.to_string()))
}

fn encode_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn status_token(status: RequirementStatus) -> &'static str {
    match status {
        RequirementStatus::Uncovered => "UNCOVERED",
        RequirementStatus::CoveredPassed => "COVERED_PASSED",
        RequirementStatus::CoveredFailed => "COVERED_FAILED",
    }
}

fn outcome_token(outcome: TestOutcome) -> &'static str {
    match outcome {
        TestOutcome::Pass => "PASS",
        TestOutcome::Fail => "FAIL",
    }
}

fn kind_token(kind: DeviationKind) -> &'static str {
    match kind {
        DeviationKind::Refusal => "refusal",
        DeviationKind::Error => "error",
        DeviationKind::Intervention => "intervention",
    }
}

fn phase_token(phase: TurnPhase) -> &'static str {
    match phase {
        TurnPhase::Input => "input",
        TurnPhase::Thought => "thought",
        TurnPhase::Action => "action",
        TurnPhase::Outcome => "outcome",
    }
}

fn component_token(kind: ComponentKind) -> &'static str {
    kind.as_str()
}

#[derive(Serialize)]
struct CanonicalPackage {
    agent_version: String,
    model_identity: String,
    generated_at: String,
    generated_by: String,
    inventory: Vec<CanonicalComponent>,
    matrix: CanonicalMatrix,
    deviations: Vec<CanonicalDeviation>,
    narratives: Vec<CanonicalNarrative>,
    config_changes: Vec<CanonicalConfigChange>,
    human_intervention_count: u64,
}

#[derive(Serialize)]
struct CanonicalComponent {
    kind: &'static str,
    identifier: String,
    content_hash: Option<String>,
}

#[derive(Serialize)]
struct CanonicalMatrix {
    requirements: Vec<CanonicalRequirement>,
    tests: Vec<CanonicalTest>,
    coverage: Vec<CanonicalCoverageEntry>,
    overall_status: &'static str,
    warnings: Vec<String>,
}

#[derive(Serialize)]
struct CanonicalRequirement {
    id: String,
    description: String,
    critical: bool,
}

#[derive(Serialize)]
struct CanonicalTest {
    test_id: String,
    outcome: &'static str,
    evidence_ref: Option<String>,
}

#[derive(Serialize)]
struct CanonicalCoverageEntry {
    requirement_id: String,
    covering_test_ids: Vec<String>,
    status: &'static str,
}

#[derive(Serialize)]
struct CanonicalDeviation {
    session_id: String,
    timestamp: String,
    risk_level: String,
    kind: &'static str,
    detail: String,
}

#[derive(Serialize)]
struct CanonicalNarrative {
    session_id: String,
    turns: Vec<CanonicalTurn>,
    annotations: Vec<CanonicalAnnotation>,
}

#[derive(Serialize)]
struct CanonicalTurn {
    sequence_no: u64,
    phase: &'static str,
    payload: String,
}

#[derive(Serialize)]
struct CanonicalAnnotation {
    turn_ref: u64,
    label: String,
    annotator: String,
    timestamp: String,
}

#[derive(Serialize)]
struct CanonicalConfigChange {
    change_id: String,
    timestamp: String,
    changed_by: String,
    field_changed: String,
    old_value: String,
    new_value: String,
    reason: String,
}

impl From<&AuditPackage> for CanonicalPackage {
    fn from(package: &AuditPackage) -> Self {
        let mut inventory: Vec<&InventoryComponent> = package.inventory.iter().collect();
        inventory.sort_by_key(|component| (component.kind.as_str(), component.identifier.clone()));

        let mut narratives: Vec<&SessionNarrative> = package.narratives.iter().collect();
        narratives.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        let mut config_changes: Vec<&ConfigChange> = package.config_changes.iter().collect();
        config_changes.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.change_id.cmp(&b.change_id))
        });

        Self {
            agent_version: package.agent_version.clone(),
            model_identity: package.model_identity.clone(),
            generated_at: encode_timestamp(&package.generated_at),
            generated_by: package.generated_by.clone(),
            inventory: inventory.into_iter().map(CanonicalComponent::from).collect(),
            matrix: CanonicalMatrix::from(&package.matrix),
            deviations: package.deviations.iter().map(CanonicalDeviation::from).collect(),
            narratives: narratives.into_iter().map(CanonicalNarrative::from).collect(),
            config_changes: config_changes
                .into_iter()
                .map(CanonicalConfigChange::from)
                .collect(),
            human_intervention_count: package.human_intervention_count,
        }
    }
}

impl From<&InventoryComponent> for CanonicalComponent {
    fn from(component: &InventoryComponent) -> Self {
        Self {
            kind: component_token(component.kind),
            identifier: component.identifier.clone(),
            content_hash: component.content_hash.clone(),
        }
    }
}

impl From<&attest_types::TraceabilityMatrix> for CanonicalMatrix {
    fn from(matrix: &attest_types::TraceabilityMatrix) -> Self {
        let mut requirements: Vec<&Requirement> = matrix.requirements.iter().collect();
        requirements.sort_by(|a, b| a.id.cmp(&b.id));

        let mut tests: Vec<&TestResult> = matrix.tests.iter().collect();
        tests.sort_by(|a, b| a.test_id.cmp(&b.test_id));

        let mut coverage: Vec<&CoverageEntry> = matrix.coverage.iter().collect();
        coverage.sort_by(|a, b| a.requirement_id.cmp(&b.requirement_id));

        Self {
            requirements: requirements
                .into_iter()
                .map(|requirement| CanonicalRequirement {
                    id: requirement.id.0.clone(),
                    description: requirement.description.clone(),
                    critical: requirement.critical,
                })
                .collect(),
            tests: tests
                .into_iter()
                .map(|test| CanonicalTest {
                    test_id: test.test_id.0.clone(),
                    outcome: outcome_token(test.outcome),
                    evidence_ref: test.evidence_ref.clone(),
                })
                .collect(),
            coverage: coverage
                .into_iter()
                .map(|entry| {
                    let mut covering: Vec<String> =
                        entry.covering_test_ids.iter().map(|id| id.0.clone()).collect();
                    covering.sort();
                    CanonicalCoverageEntry {
                        requirement_id: entry.requirement_id.0.clone(),
                        covering_test_ids: covering,
                        status: status_token(entry.status),
                    }
                })
                .collect(),
            overall_status: status_token(matrix.overall_status),
            warnings: matrix.warnings.clone(),
        }
    }
}

impl From<&DeviationEvent> for CanonicalDeviation {
    fn from(event: &DeviationEvent) -> Self {
        Self {
            session_id: event.session_id.0.clone(),
            timestamp: encode_timestamp(&event.timestamp),
            risk_level: event.risk_level.to_string(),
            kind: kind_token(event.kind),
            detail: event.detail.clone(),
        }
    }
}

impl From<&SessionNarrative> for CanonicalNarrative {
    fn from(narrative: &SessionNarrative) -> Self {
        let mut turns: Vec<&SessionTurn> = narrative.turns.iter().collect();
        turns.sort_by_key(|turn| turn.sequence_no);

        let mut annotations: Vec<&TurnAnnotation> = narrative.annotations.iter().collect();
        annotations.sort_by(|a, b| (a.turn_ref, &a.annotator).cmp(&(b.turn_ref, &b.annotator)));

        Self {
            session_id: narrative.session_id.0.clone(),
            turns: turns
                .into_iter()
                .map(|turn| CanonicalTurn {
                    sequence_no: turn.sequence_no,
                    phase: phase_token(turn.phase),
                    payload: turn.payload.clone(),
                })
                .collect(),
            annotations: annotations
                .into_iter()
                .map(|annotation| CanonicalAnnotation {
                    turn_ref: annotation.turn_ref,
                    label: annotation.label.clone(),
                    annotator: annotation.annotator.clone(),
                    timestamp: encode_timestamp(&annotation.timestamp),
                })
                .collect(),
        }
    }
}

impl From<&ConfigChange> for CanonicalConfigChange {
    fn from(change: &ConfigChange) -> Self {
        Self {
            change_id: change.change_id.clone(),
            timestamp: encode_timestamp(&change.timestamp),
            changed_by: change.changed_by.clone(),
            field_changed: change.field_changed.clone(),
            old_value: change.old_value.clone(),
            new_value: change.new_value.clone(),
            reason: change.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_types::{PackageId, SessionId, TraceabilityMatrix};
    use chrono::TimeZone;

    fn base_package() -> AuditPackage {
        AuditPackage {
            id: PackageId::generate(),
            agent_version: "2.1.0".to_string(),
            model_identity: "m@sha256:abc".to_string(),
            generated_at: Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap(),
            generated_by: "auditor".to_string(),
            inventory: vec![
                InventoryComponent::new(ComponentKind::Model, "A").with_hash("h1"),
                InventoryComponent::new(ComponentKind::Dataset, "B").with_hash("h2"),
            ],
            matrix: TraceabilityMatrix {
                requirements: vec![Requirement::new("1.1", "Verify dose")],
                tests: vec![TestResult::passed("T-100")],
                coverage: vec![CoverageEntry {
                    requirement_id: attest_types::RequirementId::new("1.1"),
                    covering_test_ids: vec![attest_types::TestId::new("T-100")],
                    status: RequirementStatus::CoveredPassed,
                }],
                overall_status: RequirementStatus::CoveredPassed,
                warnings: vec![],
            },
            deviations: vec![],
            narratives: vec![],
            config_changes: vec![],
            human_intervention_count: 3,
            document_hash: None,
            signature: None,
            signer_public_key: None,
        }
    }

    #[test]
    fn canonical_bytes_are_reproducible() {
        let package = base_package();
        assert_eq!(
            canonical_bytes(&package).unwrap(),
            canonical_bytes(&package).unwrap()
        );
    }

    #[test]
    fn package_id_does_not_affect_canonical_bytes() {
        let a = base_package();
        let mut b = a.clone();
        b.id = PackageId::generate();
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }

    #[test]
    fn seal_fields_do_not_affect_canonical_bytes() {
        let a = base_package();
        let mut b = a.clone();
        b.document_hash = Some("deadbeef".to_string());
        b.signature = Some("cafe".to_string());
        b.signer_public_key = Some("f00d".to_string());
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }

    #[test]
    fn permuted_collections_produce_identical_bytes() {
        let a = base_package();
        let mut b = a.clone();
        b.inventory.reverse();
        b.matrix.requirements.reverse();
        b.matrix.tests.reverse();
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }

    #[test]
    fn timestamps_encode_with_fixed_precision() {
        let package = base_package();
        let text = String::from_utf8(canonical_bytes(&package).unwrap()).unwrap();
        // 123_456_789 ns truncates to 123456 us.
        assert!(text.contains("2023-11-14T22:13:20.123456Z"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn component_strategy() -> impl Strategy<Value = InventoryComponent> {
            (
                prop_oneof![
                    Just(ComponentKind::Model),
                    Just(ComponentKind::Adapter),
                    Just(ComponentKind::Dataset),
                    Just(ComponentKind::Dependency),
                ],
                "[a-z0-9]{1,8}",
            )
                .prop_map(|(kind, identifier)| InventoryComponent::new(kind, identifier))
        }

        proptest! {
            // Canonical bytes are a pure function of logical content:
            // supplying the inventory in any order changes nothing.
            #[test]
            fn permuted_inventory_hashes_identically(
                components in proptest::collection::vec(component_strategy(), 0..10),
                rotation in 0usize..10,
            ) {
                let mut package = base_package();
                package.inventory = components.clone();
                let baseline = canonical_bytes(&package).unwrap();

                let mut rotated = components;
                if !rotated.is_empty() {
                    let pivot = rotation % rotated.len();
                    rotated.rotate_left(pivot);
                }
                package.inventory = rotated;

                prop_assert_eq!(canonical_bytes(&package).unwrap(), baseline);
            }
        }
    }

    #[test]
    fn deviation_order_is_preserved() {
        let mut package = base_package();
        package.deviations = vec![
            DeviationEvent {
                session_id: SessionId::new("later"),
                timestamp: Utc.timestamp_opt(1_700_000_010, 0).unwrap(),
                risk_level: attest_types::RiskLevel::High,
                kind: DeviationKind::Error,
                detail: "second".to_string(),
            },
            DeviationEvent {
                session_id: SessionId::new("earlier"),
                timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                risk_level: attest_types::RiskLevel::High,
                kind: DeviationKind::Refusal,
                detail: "first".to_string(),
            },
        ];

        let text = String::from_utf8(canonical_bytes(&package).unwrap()).unwrap();
        let second = text.find("\"second\"").unwrap();
        let first = text.find("\"first\"").unwrap();
        assert!(second < first, "source order must survive encoding");
    }
}
