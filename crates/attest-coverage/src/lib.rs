//! Attest Coverage - requirement/test traceability and the compliance gate.
//!
//! Builds the [`TraceabilityMatrix`] from declared requirements, test
//! results, and coverage links, and derives the gate decision that blocks
//! or allows package sealing. The computation is synchronous, pure, and
//! deterministic: identical inputs always produce an identical matrix.

#![deny(unsafe_code)]

use attest_types::{
    CoverageEntry, CoverageLink, Requirement, RequirementId, RequirementStatus, TestId,
    TestOutcome, TestResult, TraceabilityMatrix,
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};

/// Referential-consistency failures in the declared inputs. These surface
/// at submission, before any asynchronous work is scheduled.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoverageError {
    #[error("coverage link references unknown requirement '{0}'")]
    UnknownRequirement(RequirementId),

    #[error("coverage link references test '{0}' with no submitted result")]
    UnknownTest(TestId),

    #[error("duplicate requirement id '{0}'")]
    DuplicateRequirement(RequirementId),

    #[error("duplicate result for test '{0}'")]
    DuplicateTest(TestId),
}

/// Build the traceability matrix and gate decision.
///
/// Status rule per requirement: zero linked tests is `Uncovered`; one or
/// more linked tests with any `Fail` is `CoveredFailed` (a single failure
/// overrides any number of passes); otherwise `CoveredPassed`.
///
/// Overall status: `CoveredFailed` if any critical requirement is not
/// `CoveredPassed`; else `CoveredPassed` when every requirement passed;
/// else `Uncovered` (non-critical gaps exist but nothing critical failed).
///
/// Test results that no link references are excluded from the matrix.
pub fn build_matrix(
    requirements: &[Requirement],
    test_results: &[TestResult],
    links: &[CoverageLink],
) -> Result<TraceabilityMatrix, CoverageError> {
    let mut requirement_index: BTreeMap<RequirementId, Requirement> = BTreeMap::new();
    for requirement in requirements {
        if requirement_index
            .insert(requirement.id.clone(), requirement.clone())
            .is_some()
        {
            return Err(CoverageError::DuplicateRequirement(requirement.id.clone()));
        }
    }

    let mut test_index: BTreeMap<TestId, TestResult> = BTreeMap::new();
    for result in test_results {
        if test_index
            .insert(result.test_id.clone(), result.clone())
            .is_some()
        {
            return Err(CoverageError::DuplicateTest(result.test_id.clone()));
        }
    }

    // Every link must resolve on both ends.
    let mut linked_tests: BTreeMap<RequirementId, BTreeSet<TestId>> = BTreeMap::new();
    let mut referenced_tests: BTreeSet<TestId> = BTreeSet::new();
    for link in links {
        if !requirement_index.contains_key(&link.requirement_id) {
            return Err(CoverageError::UnknownRequirement(link.requirement_id.clone()));
        }
        if !test_index.contains_key(&link.test_id) {
            return Err(CoverageError::UnknownTest(link.test_id.clone()));
        }
        linked_tests
            .entry(link.requirement_id.clone())
            .or_default()
            .insert(link.test_id.clone());
        referenced_tests.insert(link.test_id.clone());
    }

    let mut coverage = Vec::with_capacity(requirement_index.len());
    let mut warnings = Vec::new();

    for (id, requirement) in &requirement_index {
        let covering: Vec<TestId> = linked_tests
            .get(id)
            .map(|tests| tests.iter().cloned().collect())
            .unwrap_or_default();

        let status = if covering.is_empty() {
            RequirementStatus::Uncovered
        } else if covering
            .iter()
            .any(|test_id| test_index[test_id].outcome == TestOutcome::Fail)
        {
            RequirementStatus::CoveredFailed
        } else {
            RequirementStatus::CoveredPassed
        };

        if !requirement.critical && status != RequirementStatus::CoveredPassed {
            warnings.push(format!(
                "non-critical requirement '{}' is {}",
                id, status
            ));
        }

        coverage.push(CoverageEntry {
            requirement_id: id.clone(),
            covering_test_ids: covering,
            status,
        });
    }

    let overall_status = overall_status(&requirement_index, &coverage);
    debug!(%overall_status, requirements = coverage.len(), "traceability matrix computed");
    if !warnings.is_empty() {
        warn!(count = warnings.len(), "non-critical coverage gaps recorded");
    }

    // Only tests referenced by a link appear in the matrix.
    let tests: Vec<TestResult> = referenced_tests
        .iter()
        .map(|id| test_index[id].clone())
        .collect();

    Ok(TraceabilityMatrix {
        requirements: requirement_index.into_values().collect(),
        tests,
        coverage,
        overall_status,
        warnings,
    })
}

fn overall_status(
    requirements: &BTreeMap<RequirementId, Requirement>,
    coverage: &[CoverageEntry],
) -> RequirementStatus {
    let critical_gap = coverage.iter().any(|entry| {
        requirements[&entry.requirement_id].critical
            && entry.status != RequirementStatus::CoveredPassed
    });
    if critical_gap {
        return RequirementStatus::CoveredFailed;
    }

    if coverage
        .iter()
        .all(|entry| entry.status == RequirementStatus::CoveredPassed)
    {
        RequirementStatus::CoveredPassed
    } else {
        RequirementStatus::Uncovered
    }
}

/// Requirement ids that block sealing.
///
/// A critical requirement that is not `CoveredPassed` always blocks. Under
/// strict mode every requirement must be `CoveredPassed`, so non-critical
/// gaps block as well.
pub fn gate_failures(matrix: &TraceabilityMatrix, strict: bool) -> Vec<RequirementId> {
    let critical: BTreeSet<&RequirementId> = matrix
        .requirements
        .iter()
        .filter(|requirement| requirement.critical)
        .map(|requirement| &requirement.id)
        .collect();

    matrix
        .coverage
        .iter()
        .filter(|entry| entry.status != RequirementStatus::CoveredPassed)
        .filter(|entry| strict || critical.contains(&entry.requirement_id))
        .map(|entry| entry.requirement_id.clone())
        .collect()
}
