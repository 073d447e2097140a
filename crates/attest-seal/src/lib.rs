//! Attest Seal - canonical assembly, hashing, and signing of audit
//! packages.
//!
//! The canonical byte form produced here is the only thing ever hashed;
//! display and export formats are independent transforms of the same
//! record and can never affect the document hash.

#![deny(unsafe_code)]

pub mod canonical;
pub mod sealer;

pub use canonical::canonical_bytes;
pub use sealer::{
    Ed25519Authority, RetryPolicy, SealError, SealedPackage, Sealer, SigningAuthority,
    DIGEST_DOMAIN,
};

use attest_types::{
    AuditPackage, ConfigChange, DeviationEvent, InventoryComponent, PackageId, SessionNarrative,
    TraceabilityMatrix,
};
use chrono::{DateTime, Utc};

/// Run metadata stamped onto the package at assembly time. The timestamp
/// is an input, not sampled here, so identical inputs reproduce identical
/// canonical bytes.
#[derive(Clone, Debug)]
pub struct PackageMeta {
    pub agent_version: String,
    pub model_identity: String,
    pub generated_at: DateTime<Utc>,
    pub generated_by: String,
}

/// Compose the unsealed package and its canonical byte serialization.
///
/// `document_hash`, `signature`, and `signer_public_key` are left unset;
/// the [`Sealer`] populates them. The collections are expected in the
/// deterministic orders established by the upstream stages; the canonical
/// encoder re-asserts the sorted ones regardless.
pub fn assemble(
    meta: PackageMeta,
    inventory: Vec<InventoryComponent>,
    matrix: TraceabilityMatrix,
    deviations: Vec<DeviationEvent>,
    human_intervention_count: u64,
    narratives: Vec<SessionNarrative>,
    config_changes: Vec<ConfigChange>,
) -> Result<(AuditPackage, Vec<u8>), SealError> {
    let package = AuditPackage {
        id: PackageId::generate(),
        agent_version: meta.agent_version,
        model_identity: meta.model_identity,
        generated_at: meta.generated_at,
        generated_by: meta.generated_by,
        inventory,
        matrix,
        deviations,
        narratives,
        config_changes,
        human_intervention_count,
        document_hash: None,
        signature: None,
        signer_public_key: None,
    };

    let bytes = canonical_bytes(&package)?;
    Ok((package, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_types::RequirementStatus;
    use chrono::TimeZone;

    fn empty_matrix() -> TraceabilityMatrix {
        TraceabilityMatrix {
            requirements: vec![],
            tests: vec![],
            coverage: vec![],
            overall_status: RequirementStatus::CoveredPassed,
            warnings: vec![],
        }
    }

    #[test]
    fn assemble_leaves_seal_fields_unset() {
        let meta = PackageMeta {
            agent_version: "1.0.0".to_string(),
            model_identity: "m@sha256:0".to_string(),
            generated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            generated_by: "auditor".to_string(),
        };
        let (package, bytes) = assemble(meta, vec![], empty_matrix(), vec![], 0, vec![], vec![])
            .unwrap();

        assert!(!package.is_sealed());
        assert!(package.document_hash.is_none());
        assert!(!bytes.is_empty());
    }
}
