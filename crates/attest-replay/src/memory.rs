//! In-memory session source for tests, demos, and single-process
//! deployments.

use crate::source::{FieldDecryptor, ReplayError, SessionSource};
use async_trait::async_trait;
use attest_types::{ConfigChange, DeviationEvent, SessionId, SessionTurn, TurnAnnotation};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A [`SessionSource`] backed by process memory. Writes happen only
/// through the seeding methods, which are not part of the capability
/// trait — pipeline code still sees a read-only store.
#[derive(Default)]
pub struct InMemorySessionSource {
    events: RwLock<Vec<DeviationEvent>>,
    turns: RwLock<HashMap<SessionId, Vec<SessionTurn>>>,
    annotations: RwLock<HashMap<SessionId, Vec<TurnAnnotation>>>,
    config_changes: RwLock<Vec<ConfigChange>>,
}

impl InMemorySessionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_event(&self, event: DeviationEvent) {
        self.events.write().await.push(event);
    }

    pub async fn add_turn(&self, turn: SessionTurn) {
        self.turns
            .write()
            .await
            .entry(turn.session_id.clone())
            .or_default()
            .push(turn);
    }

    pub async fn add_annotation(&self, annotation: TurnAnnotation) {
        self.annotations
            .write()
            .await
            .entry(annotation.session_id.clone())
            .or_default()
            .push(annotation);
    }

    pub async fn add_config_change(&self, change: ConfigChange) {
        self.config_changes.write().await.push(change);
    }
}

#[async_trait]
impl SessionSource for InMemorySessionSource {
    async fn fetch_events(&self, _agent_version: &str) -> Result<Vec<DeviationEvent>, ReplayError> {
        Ok(self.events.read().await.clone())
    }

    async fn fetch_turns(&self, session_id: &SessionId) -> Result<Vec<SessionTurn>, ReplayError> {
        Ok(self
            .turns
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_annotations(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<TurnAnnotation>, ReplayError> {
        Ok(self
            .annotations
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_config_changes(
        &self,
        _limit: Option<usize>,
    ) -> Result<Vec<ConfigChange>, ReplayError> {
        Ok(self.config_changes.read().await.clone())
    }
}

/// Decryptor that strips an `ENC:` prefix and rejects anything else as
/// plaintext. Mirrors the envelope convention used by field-level
/// encryption services; handy for tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct PrefixDecryptor;

#[async_trait]
impl FieldDecryptor for PrefixDecryptor {
    async fn decrypt(&self, field: &str) -> Result<String, ReplayError> {
        match field.strip_prefix("ENC:") {
            Some(plaintext) => Ok(plaintext.to_string()),
            None => Err(ReplayError::Decrypt("field is not enveloped".to_string())),
        }
    }
}
