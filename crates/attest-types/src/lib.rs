//! Attest Types - shared data model for audit package generation
//!
//! Everything that crosses a crate boundary lives here: declared compliance
//! inputs (requirements, test results, coverage links), the derived
//! traceability matrix, the inventory and deviation records, session
//! narratives, and the audit package itself.

#![deny(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a declared compliance requirement (e.g. "1.1").
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequirementId(pub String);

impl RequirementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for RequirementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a compliance test (e.g. "T-100").
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TestId(pub String);

impl TestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a recorded agent session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of an audit package.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageId(pub uuid::Uuid);

impl PackageId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A declared compliance requirement. Immutable once loaded into a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: RequirementId,
    pub description: String,
    /// Critical requirements gate package sealing.
    pub critical: bool,
}

impl Requirement {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: RequirementId::new(id),
            description: description.into(),
            critical: true,
        }
    }

    pub fn non_critical(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            critical: false,
            ..Self::new(id, description)
        }
    }
}

/// Outcome of one compliance test execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestOutcome {
    Pass,
    Fail,
}

/// The result of a single compliance test, declared externally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: TestId,
    pub outcome: TestOutcome,
    /// Pointer to the evidence backing this result (log, report, run id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_ref: Option<String>,
}

impl TestResult {
    pub fn passed(test_id: impl Into<String>) -> Self {
        Self {
            test_id: TestId::new(test_id),
            outcome: TestOutcome::Pass,
            evidence_ref: None,
        }
    }

    pub fn failed(test_id: impl Into<String>) -> Self {
        Self {
            test_id: TestId::new(test_id),
            outcome: TestOutcome::Fail,
            evidence_ref: None,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence_ref = Some(evidence.into());
        self
    }
}

/// Declared association between a requirement and a test that validates it.
/// Many-to-many: one requirement may be covered by several tests and one
/// test may cover several requirements.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoverageLink {
    pub requirement_id: RequirementId,
    pub test_id: TestId,
}

impl CoverageLink {
    pub fn new(requirement_id: impl Into<String>, test_id: impl Into<String>) -> Self {
        Self {
            requirement_id: RequirementId::new(requirement_id),
            test_id: TestId::new(test_id),
        }
    }
}

/// Coverage status of a single requirement, or of the whole matrix.
///
/// A single failing test overrides any number of passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequirementStatus {
    Uncovered,
    CoveredPassed,
    CoveredFailed,
}

impl fmt::Display for RequirementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uncovered => write!(f, "UNCOVERED"),
            Self::CoveredPassed => write!(f, "COVERED_PASSED"),
            Self::CoveredFailed => write!(f, "COVERED_FAILED"),
        }
    }
}

/// Derived coverage for one requirement: which tests cover it and the
/// resulting status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageEntry {
    pub requirement_id: RequirementId,
    /// Sorted ascending for deterministic serialization.
    pub covering_test_ids: Vec<TestId>,
    pub status: RequirementStatus,
}

/// The requirement/test traceability matrix. Read-only after computation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceabilityMatrix {
    /// Requirements, sorted by id.
    pub requirements: Vec<Requirement>,
    /// Test results referenced by at least one coverage link, sorted by
    /// test id. Unreferenced results are excluded.
    pub tests: Vec<TestResult>,
    /// Per-requirement coverage, sorted by requirement id.
    pub coverage: Vec<CoverageEntry>,
    /// The gate decision.
    pub overall_status: RequirementStatus,
    /// Non-fatal coverage gaps (non-critical uncovered/failed requirements).
    pub warnings: Vec<String>,
}

impl TraceabilityMatrix {
    /// Look up the derived status of a single requirement.
    pub fn status_of(&self, id: &RequirementId) -> Option<RequirementStatus> {
        self.coverage
            .iter()
            .find(|entry| &entry.requirement_id == id)
            .map(|entry| entry.status)
    }
}

/// Kind of an inventory component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    Model,
    Adapter,
    Dataset,
    Dependency,
}

impl ComponentKind {
    /// Canonical lowercase name. Inventory ordering sorts on this string,
    /// not on declaration order.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Adapter => "adapter",
            Self::Dataset => "dataset",
            Self::Dependency => "dependency",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One provenance component of the agent: the base model, an adapter, a
/// training dataset lineage entry, or a software dependency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryComponent {
    pub kind: ComponentKind,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl InventoryComponent {
    pub fn new(kind: ComponentKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            content_hash: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    /// Dedup/sort key: `(kind, identifier)`.
    pub fn key(&self) -> (&'static str, &str) {
        (self.kind.as_str(), &self.identifier)
    }
}

/// Risk classification of an operational event. Ordered: `Low < Medium <
/// High < Critical`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Kind of a deviation event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviationKind {
    Refusal,
    Error,
    /// A human stepped in and overrode or corrected the agent.
    Intervention,
}

/// An operational event that may end up in the deviation report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviationEvent {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub kind: DeviationKind,
    pub detail: String,
}

/// Phase of a single session turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurnPhase {
    Input,
    Thought,
    Action,
    Outcome,
}

/// One turn of an agent session, as recorded by the event store. Turns may
/// arrive in any order; `sequence_no` alone defines narrative order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTurn {
    pub session_id: SessionId,
    pub sequence_no: u64,
    pub phase: TurnPhase,
    pub payload: String,
}

/// A human annotation attached to one turn of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnAnnotation {
    pub session_id: SessionId,
    /// `sequence_no` of the annotated turn.
    pub turn_ref: u64,
    pub label: String,
    pub annotator: String,
    pub timestamp: DateTime<Utc>,
}

/// A reconstructed session: turns in strict sequence order, with any
/// annotation overlay that matched an existing turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNarrative {
    pub session_id: SessionId,
    pub turns: Vec<SessionTurn>,
    pub annotations: Vec<TurnAnnotation>,
}

/// A recorded change to the agent's configuration, part of the audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub change_id: String,
    pub timestamp: DateTime<Utc>,
    pub changed_by: String,
    pub field_changed: String,
    pub old_value: String,
    pub new_value: String,
    pub reason: String,
}

/// The audit package: one sealed, immutable record gating a release.
///
/// `document_hash` and `signature` are unset until sealing. Sealing is the
/// only operation that sets them; afterwards the package is frozen behind
/// `SealedPackage` and any further change requires building and re-sealing
/// a new package.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditPackage {
    pub id: PackageId,
    pub agent_version: String,
    /// Display identity of the audited model, e.g.
    /// `"llama-3@sha256:abc + adapter@sha256:def"`.
    pub model_identity: String,
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
    /// Deduplicated provenance components, sorted by `(kind, identifier)`.
    pub inventory: Vec<InventoryComponent>,
    pub matrix: TraceabilityMatrix,
    /// Above-threshold deviation events, in original timestamp order.
    pub deviations: Vec<DeviationEvent>,
    /// Reconstructed narratives for the deviating sessions, sorted by
    /// session id.
    pub narratives: Vec<SessionNarrative>,
    /// Configuration audit trail, newest first.
    pub config_changes: Vec<ConfigChange>,
    /// All intervention events, counted independently of the risk threshold.
    pub human_intervention_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_public_key: Option<String>,
}

impl AuditPackage {
    /// Whether the seal fields have been populated.
    pub fn is_sealed(&self) -> bool {
        self.document_hash.is_some() && self.signature.is_some()
    }
}
