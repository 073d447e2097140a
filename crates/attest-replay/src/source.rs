//! Capability interfaces onto the external session/event store and the
//! decryption authority. Both are injected; neither is a global.

use async_trait::async_trait;
use attest_types::{ConfigChange, DeviationEvent, SessionId, SessionTurn, TurnAnnotation};
use thiserror::Error;
use tracing::debug;

/// Errors from the external session source or decryption capability.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("session source unavailable: {0}")]
    Source(String),

    #[error("decryption rejected: {0}")]
    Decrypt(String),
}

/// Read-only access to the source event store.
///
/// The trait deliberately has no write or delete surface: the core must
/// never be capable of mutating the store it audits.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// All operational events recorded for the given agent version, in
    /// timestamp order.
    async fn fetch_events(&self, agent_version: &str) -> Result<Vec<DeviationEvent>, ReplayError>;

    /// Raw turns of one session, in arrival order (not necessarily
    /// sequence order).
    async fn fetch_turns(&self, session_id: &SessionId) -> Result<Vec<SessionTurn>, ReplayError>;

    /// Human annotations recorded against one session.
    async fn fetch_annotations(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<TurnAnnotation>, ReplayError>;

    /// Configuration audit trail, unordered.
    async fn fetch_config_changes(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<ConfigChange>, ReplayError>;
}

/// Decryption capability for protected fields.
#[async_trait]
pub trait FieldDecryptor: Send + Sync {
    async fn decrypt(&self, field: &str) -> Result<String, ReplayError>;
}

/// Pass-through decryptor for deployments without field encryption.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDecryptor;

#[async_trait]
impl FieldDecryptor for NoopDecryptor {
    async fn decrypt(&self, field: &str) -> Result<String, ReplayError> {
        Ok(field.to_string())
    }
}

/// Decrypt `text`, returning the original on failure. Plaintext fields are
/// expected to be rejected by the decryptor, so failure must not lose data.
pub async fn decrypt_safe(decryptor: &dyn FieldDecryptor, text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    match decryptor.decrypt(text).await {
        Ok(plaintext) => plaintext,
        Err(err) => {
            debug!(error = %err, "field left as-is after decryption failure");
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectingDecryptor;

    #[async_trait]
    impl FieldDecryptor for RejectingDecryptor {
        async fn decrypt(&self, _field: &str) -> Result<String, ReplayError> {
            Err(ReplayError::Decrypt("not encrypted".to_string()))
        }
    }

    #[tokio::test]
    async fn decrypt_safe_returns_original_on_failure() {
        let text = decrypt_safe(&RejectingDecryptor, "some text").await;
        assert_eq!(text, "some text");
    }

    #[tokio::test]
    async fn decrypt_safe_passes_empty_through() {
        let text = decrypt_safe(&RejectingDecryptor, "").await;
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn noop_decryptor_is_identity() {
        let text = decrypt_safe(&NoopDecryptor, "plain").await;
        assert_eq!(text, "plain");
    }
}
