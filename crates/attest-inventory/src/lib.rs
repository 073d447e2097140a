//! Attest Inventory - assembles the agent's provenance inventory.
//!
//! Merges the base model, adapters, data lineage, and the software
//! dependency snapshot into one deduplicated component list with a
//! deterministic ordering. The ordering exists for hash stability
//! downstream, not for display. Pure functions only; no I/O.

#![deny(unsafe_code)]

use attest_types::{ComponentKind, InventoryComponent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// A pinned software dependency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyPin {
    pub name: String,
    pub version: String,
}

impl DependencyPin {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse a freeze-style `name==version` spec. The split happens on the
    /// first `==` only; specs without one keep the whole string as the
    /// name and get version `"unknown"`.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once("==") {
            Some((name, version)) => Self::new(name, version),
            None => Self::new(spec, "unknown"),
        }
    }

    fn identifier(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// An adapter layered onto the base model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterRef {
    pub name: String,
    pub content_sha: String,
}

impl AdapterRef {
    pub fn new(name: impl Into<String>, content_sha: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_sha: content_sha.into(),
        }
    }
}

/// Seed data for inventory assembly, declared per run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySeed {
    pub model_name: String,
    pub model_version: String,
    pub model_sha: String,
    #[serde(default)]
    pub adapters: Vec<AdapterRef>,
    /// Ingestion job ids establishing the training-data lineage.
    #[serde(default)]
    pub data_lineage: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyPin>,
}

impl InventorySeed {
    pub fn new(
        model_name: impl Into<String>,
        model_version: impl Into<String>,
        model_sha: impl Into<String>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            model_version: model_version.into(),
            model_sha: model_sha.into(),
            adapters: Vec::new(),
            data_lineage: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

/// Display identity of the audited model: `name@sha`, with each adapter
/// appended as `+ name@sha`.
pub fn model_identity(seed: &InventorySeed) -> String {
    let mut identity = format!("{}@{}", seed.model_name, seed.model_sha);
    for adapter in &seed.adapters {
        identity.push_str(&format!(" + {}@{}", adapter.name, adapter.content_sha));
    }
    identity
}

/// Assemble the deduplicated, deterministically ordered component list.
///
/// Duplicates by `(kind, identifier)` keep the first occurrence. The final
/// ordering is ascending by `(kind, identifier)`, comparing kinds by their
/// canonical lowercase name.
pub fn assemble(seed: &InventorySeed) -> Vec<InventoryComponent> {
    let mut components = Vec::new();

    components.push(
        InventoryComponent::new(
            ComponentKind::Model,
            format!("{}@{}", seed.model_name, seed.model_version),
        )
        .with_hash(seed.model_sha.clone()),
    );

    for adapter in &seed.adapters {
        components.push(
            InventoryComponent::new(ComponentKind::Adapter, adapter.name.clone())
                .with_hash(adapter.content_sha.clone()),
        );
    }

    for lineage in &seed.data_lineage {
        components.push(InventoryComponent::new(ComponentKind::Dataset, lineage.clone()));
    }

    for dependency in &seed.dependencies {
        components.push(InventoryComponent::new(
            ComponentKind::Dependency,
            dependency.identifier(),
        ));
    }

    dedup_and_sort(components)
}

/// Deduplicate by `(kind, identifier)` keeping the first occurrence, then
/// sort ascending by the same key.
pub fn dedup_and_sort(components: Vec<InventoryComponent>) -> Vec<InventoryComponent> {
    let mut seen: BTreeSet<(&'static str, String)> = BTreeSet::new();
    let mut kept = Vec::with_capacity(components.len());
    for component in components {
        let key = (component.kind.as_str(), component.identifier.clone());
        if seen.insert(key) {
            kept.push(component);
        }
    }

    kept.sort_by(|a, b| a.key().cmp(&b.key()));
    debug!(components = kept.len(), "inventory assembled");
    kept
}
