//! Hash-and-sign sealing of assembled packages.

use crate::canonical::canonical_bytes;
use async_trait::async_trait;
use attest_crypto::{DetachedSignature, Digest, SigningIdentity};
use attest_types::AuditPackage;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Domain-separation prefix for package digests.
pub const DIGEST_DOMAIN: &str = "attest-package-v1:";

/// Sealing failures.
#[derive(Debug, Error)]
pub enum SealError {
    #[error("canonical serialization failed: {0}")]
    Serialization(String),

    /// The signing authority was unreachable or rejected the request.
    /// Retryable with bounded backoff.
    #[error("signing authority unavailable: {0}")]
    ExternalService(String),

    /// The digest recomputed after embedding the seal does not match the
    /// embedded hash. Fatal: indicates a canonicalization defect, never
    /// retried.
    #[error("document hash mismatch after sealing: expected {expected}, recomputed {recomputed}")]
    Integrity { expected: String, recomputed: String },

    #[error("package is already sealed")]
    AlreadySealed,

    #[error("seal verification failed: {0}")]
    Verification(String),
}

/// External identity authority that signs package digests. Implementations
/// are injected; the core never talks to a signing backend directly.
#[async_trait]
pub trait SigningAuthority: Send + Sync {
    async fn sign(&self, digest: &Digest) -> Result<DetachedSignature, SealError>;

    /// Identity the signatures are bound to, for logging and audit.
    fn key_id(&self) -> &str;
}

/// Local Ed25519 signing authority. Stands in for the external identity
/// service in tests and single-node deployments.
pub struct Ed25519Authority {
    identity: SigningIdentity,
}

impl Ed25519Authority {
    pub fn new(identity: SigningIdentity) -> Self {
        Self { identity }
    }

    pub fn generate(key_id: impl Into<String>) -> Self {
        Self::new(SigningIdentity::generate(key_id))
    }
}

#[async_trait]
impl SigningAuthority for Ed25519Authority {
    async fn sign(&self, digest: &Digest) -> Result<DetachedSignature, SealError> {
        Ok(self.identity.sign(digest.as_bytes()))
    }

    fn key_id(&self) -> &str {
        self.identity.key_id()
    }
}

/// Bounded exponential backoff for signing requests.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// A sealed, immutable audit package.
///
/// There is no mutating accessor: changing the record means assembling and
/// sealing a new package. The canonical bytes the hash was computed over
/// are retained so the seal can be re-verified at any time.
#[derive(Clone, Debug)]
pub struct SealedPackage {
    package: AuditPackage,
    canonical: Vec<u8>,
    digest: Digest,
}

impl SealedPackage {
    pub fn package(&self) -> &AuditPackage {
        &self.package
    }

    pub fn canonical_bytes(&self) -> &[u8] {
        &self.canonical
    }

    pub fn document_hash(&self) -> &Digest {
        &self.digest
    }

    /// Re-verify the seal: recompute the digest over the embedded
    /// canonical content and check the signature over it.
    pub fn verify(&self) -> Result<(), SealError> {
        let recomputed_bytes = canonical_bytes(&self.package)?;
        let recomputed = Digest::compute(DIGEST_DOMAIN, &recomputed_bytes);
        let stored = self
            .package
            .document_hash
            .as_deref()
            .ok_or_else(|| SealError::Verification("document hash missing".to_string()))?;
        if recomputed.to_hex() != stored {
            return Err(SealError::Integrity {
                expected: stored.to_string(),
                recomputed: recomputed.to_hex(),
            });
        }

        let signature = DetachedSignature {
            signature: self
                .package
                .signature
                .clone()
                .ok_or_else(|| SealError::Verification("signature missing".to_string()))?,
            public_key: self
                .package
                .signer_public_key
                .clone()
                .ok_or_else(|| SealError::Verification("signer public key missing".to_string()))?,
        };
        signature
            .verify(recomputed.as_bytes())
            .map_err(|err| SealError::Verification(err.to_string()))
    }
}

/// Seals assembled packages: digest, external signature, embed, re-check.
pub struct Sealer {
    authority: Arc<dyn SigningAuthority>,
    retry: RetryPolicy,
}

impl Sealer {
    pub fn new(authority: Arc<dyn SigningAuthority>) -> Self {
        Self {
            authority,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Seal `package`. The input must be unsealed; a sealed package is
    /// immutable and can only be superseded by a freshly assembled one.
    pub async fn seal(&self, mut package: AuditPackage) -> Result<SealedPackage, SealError> {
        if package.is_sealed() {
            return Err(SealError::AlreadySealed);
        }

        let canonical = canonical_bytes(&package)?;
        let digest = Digest::compute(DIGEST_DOMAIN, &canonical);
        let signature = self.sign_with_retry(&digest).await?;

        package.document_hash = Some(digest.to_hex());
        package.signature = Some(signature.signature.clone());
        package.signer_public_key = Some(signature.public_key.clone());

        // The seal fields are excluded from the canonical form, so the
        // digest must be reproducible from the embedded record. A mismatch
        // is a canonicalization defect and must never be ignored.
        let recomputed = Digest::compute(DIGEST_DOMAIN, &canonical_bytes(&package)?);
        if recomputed != digest {
            error!(
                expected = %digest,
                recomputed = %recomputed,
                "post-seal digest mismatch"
            );
            return Err(SealError::Integrity {
                expected: digest.to_hex(),
                recomputed: recomputed.to_hex(),
            });
        }

        info!(package_id = %package.id, digest = %digest, signer = self.authority.key_id(), "package sealed");
        Ok(SealedPackage {
            package,
            canonical,
            digest,
        })
    }

    async fn sign_with_retry(&self, digest: &Digest) -> Result<DetachedSignature, SealError> {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.authority.sign(digest).await {
                Ok(signature) => return Ok(signature),
                Err(SealError::ExternalService(reason)) if attempt < self.retry.max_attempts => {
                    warn!(attempt, %reason, "signing attempt failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.retry.max_backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assemble, PackageMeta};
    use attest_types::{RequirementStatus, TraceabilityMatrix};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unsealed_package() -> AuditPackage {
        let meta = PackageMeta {
            agent_version: "1.0.0".to_string(),
            model_identity: "m@sha256:0".to_string(),
            generated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            generated_by: "signer-001".to_string(),
        };
        let matrix = TraceabilityMatrix {
            requirements: vec![],
            tests: vec![],
            coverage: vec![],
            overall_status: RequirementStatus::CoveredPassed,
            warnings: vec![],
        };
        assemble(meta, vec![], matrix, vec![], 0, vec![], vec![])
            .unwrap()
            .0
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    /// Authority that fails a fixed number of times before signing.
    struct FlakyAuthority {
        inner: Ed25519Authority,
        failures_remaining: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyAuthority {
        fn new(failures: u32) -> Self {
            Self {
                inner: Ed25519Authority::generate("flaky"),
                failures_remaining: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl SigningAuthority for FlakyAuthority {
        async fn sign(&self, digest: &Digest) -> Result<DetachedSignature, SealError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SealError::ExternalService("connection refused".to_string()));
            }
            self.inner.sign(digest).await
        }

        fn key_id(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn seal_populates_and_verifies() {
        let sealer = Sealer::new(Arc::new(Ed25519Authority::generate("signer-001")));
        let sealed = sealer.seal(unsealed_package()).await.unwrap();

        assert!(sealed.package().is_sealed());
        assert_eq!(
            sealed.package().document_hash.as_deref(),
            Some(sealed.document_hash().to_hex().as_str())
        );
        sealed.verify().unwrap();
    }

    #[tokio::test]
    async fn verification_is_idempotent() {
        let sealer = Sealer::new(Arc::new(Ed25519Authority::generate("signer-001")));
        let sealed = sealer.seal(unsealed_package()).await.unwrap();
        for _ in 0..3 {
            sealed.verify().unwrap();
        }
    }

    #[tokio::test]
    async fn identical_inputs_reproduce_the_document_hash() {
        let sealer = Sealer::new(Arc::new(Ed25519Authority::generate("signer-001")));
        let a = sealer.seal(unsealed_package()).await.unwrap();
        let b = sealer.seal(unsealed_package()).await.unwrap();
        assert_eq!(a.document_hash(), b.document_hash());
    }

    #[tokio::test]
    async fn transient_signing_failures_are_retried() {
        let authority = Arc::new(FlakyAuthority::new(2));
        let sealer = Sealer::new(authority.clone()).with_retry(fast_retry());

        let sealed = sealer.seal(unsealed_package()).await.unwrap();
        sealed.verify().unwrap();
        assert_eq!(authority.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let authority = Arc::new(FlakyAuthority::new(10));
        let sealer = Sealer::new(authority.clone()).with_retry(fast_retry());

        let err = sealer.seal(unsealed_package()).await.unwrap_err();
        assert!(matches!(err, SealError::ExternalService(_)));
        assert_eq!(authority.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn sealing_twice_is_rejected() {
        let sealer = Sealer::new(Arc::new(Ed25519Authority::generate("signer-001")));
        let sealed = sealer.seal(unsealed_package()).await.unwrap();

        let err = sealer.seal(sealed.package().clone()).await.unwrap_err();
        assert!(matches!(err, SealError::AlreadySealed));
    }
}
