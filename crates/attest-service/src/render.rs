//! Export-format capability interfaces.
//!
//! PDF, CSV, and bill-of-materials encodings are produced by external
//! renderers consuming the immutable sealed package. The core's only
//! contract with them is to hand over the package and its canonical bytes
//! unchanged.

use attest_seal::SealedPackage;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Requested export encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Csv,
    /// Machine-readable inventory encoding.
    Bom,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pdf => write!(f, "pdf"),
            Self::Csv => write!(f, "csv"),
            Self::Bom => write!(f, "bom"),
        }
    }
}

/// Rendering failures, surfaced verbatim to the caller.
#[derive(Debug, Error)]
#[error("render failed: {0}")]
pub struct RenderError(pub String);

/// An injected output capability turning a sealed package into an export
/// byte stream. Renderers must treat the package as read-only; the seal
/// makes any mutation detectable.
pub trait ArtifactRenderer: Send + Sync {
    fn render(&self, package: &SealedPackage) -> Result<Vec<u8>, RenderError>;
}

/// Renderer that emits the canonical byte form itself. Useful wherever
/// the verbatim hash input is the artifact of record.
#[derive(Clone, Copy, Debug, Default)]
pub struct CanonicalJsonRenderer;

impl ArtifactRenderer for CanonicalJsonRenderer {
    fn render(&self, package: &SealedPackage) -> Result<Vec<u8>, RenderError> {
        Ok(package.canonical_bytes().to_vec())
    }
}
