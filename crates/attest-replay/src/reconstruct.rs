//! Session narrative reconstruction: strict sequence ordering plus the
//! human annotation overlay.

use crate::source::{decrypt_safe, FieldDecryptor, ReplayError, SessionSource};
use attest_types::{
    ConfigChange, DeviationEvent, SessionId, SessionNarrative, SessionTurn, TurnAnnotation,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Order raw turns into per-session narratives and apply the annotation
/// overlay.
///
/// Turns are grouped by session and ordered strictly by `sequence_no` —
/// arrival order and timestamp skew never affect narrative order. An
/// annotation whose `turn_ref` matches no turn in its session is dropped
/// with a warning; reconstruction itself never fails on overlay data.
pub fn reconstruct(
    turns: Vec<SessionTurn>,
    annotations: Vec<TurnAnnotation>,
) -> (Vec<SessionNarrative>, Vec<String>) {
    let mut sessions: BTreeMap<SessionId, Vec<SessionTurn>> = BTreeMap::new();
    for turn in turns {
        sessions.entry(turn.session_id.clone()).or_default().push(turn);
    }
    for turns in sessions.values_mut() {
        turns.sort_by_key(|turn| turn.sequence_no);
    }

    let mut overlays: BTreeMap<SessionId, Vec<TurnAnnotation>> = BTreeMap::new();
    let mut warnings = Vec::new();
    for annotation in annotations {
        let known_turn = sessions
            .get(&annotation.session_id)
            .is_some_and(|turns| {
                turns
                    .iter()
                    .any(|turn| turn.sequence_no == annotation.turn_ref)
            });
        if known_turn {
            overlays
                .entry(annotation.session_id.clone())
                .or_default()
                .push(annotation);
        } else {
            let message = format!(
                "annotation by '{}' on session '{}' references missing turn {}",
                annotation.annotator, annotation.session_id, annotation.turn_ref
            );
            warn!("{message}");
            warnings.push(message);
        }
    }

    let narratives = sessions
        .into_iter()
        .map(|(session_id, turns)| {
            let mut annotations = overlays.remove(&session_id).unwrap_or_default();
            annotations.sort_by(|a, b| {
                (a.turn_ref, &a.annotator).cmp(&(b.turn_ref, &b.annotator))
            });
            SessionNarrative {
                session_id,
                turns,
                annotations,
            }
        })
        .collect();

    (narratives, warnings)
}

/// Reconstructs sessions from the external store, decrypting protected
/// fields along the way.
pub struct SessionReplayer {
    source: Arc<dyn SessionSource>,
    decryptor: Arc<dyn FieldDecryptor>,
}

impl SessionReplayer {
    pub fn new(source: Arc<dyn SessionSource>, decryptor: Arc<dyn FieldDecryptor>) -> Self {
        Self { source, decryptor }
    }

    /// All operational events for an agent version, with protected detail
    /// fields decrypted where possible.
    pub async fn deviation_events(
        &self,
        agent_version: &str,
    ) -> Result<Vec<DeviationEvent>, ReplayError> {
        let mut events = self.source.fetch_events(agent_version).await?;
        for event in &mut events {
            event.detail = decrypt_safe(self.decryptor.as_ref(), &event.detail).await;
        }
        info!(count = events.len(), agent_version, "fetched operational events");
        Ok(events)
    }

    /// Reconstruct narratives for the given sessions. Duplicate ids are
    /// collapsed; output is sorted by session id.
    pub async fn narratives(
        &self,
        session_ids: &[SessionId],
    ) -> Result<(Vec<SessionNarrative>, Vec<String>), ReplayError> {
        let unique: BTreeSet<&SessionId> = session_ids.iter().collect();

        let mut all_turns = Vec::new();
        let mut all_annotations = Vec::new();
        for session_id in unique {
            let mut turns = self.source.fetch_turns(session_id).await?;
            for turn in &mut turns {
                turn.payload = decrypt_safe(self.decryptor.as_ref(), &turn.payload).await;
            }
            all_turns.extend(turns);

            let mut annotations = self.source.fetch_annotations(session_id).await?;
            for annotation in &mut annotations {
                annotation.label = decrypt_safe(self.decryptor.as_ref(), &annotation.label).await;
            }
            all_annotations.extend(annotations);
        }

        Ok(reconstruct(all_turns, all_annotations))
    }

    /// Configuration audit trail, newest first, `change_id` as tie-break.
    pub async fn config_changes(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<ConfigChange>, ReplayError> {
        let mut changes = self.source.fetch_config_changes(limit).await?;
        changes.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.change_id.cmp(&b.change_id))
        });
        if let Some(limit) = limit {
            changes.truncate(limit);
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_types::TurnPhase;
    use chrono::{TimeZone, Utc};

    fn turn(session: &str, sequence_no: u64, payload: &str) -> SessionTurn {
        SessionTurn {
            session_id: SessionId::new(session),
            sequence_no,
            phase: TurnPhase::Action,
            payload: payload.to_string(),
        }
    }

    fn annotation(session: &str, turn_ref: u64, label: &str) -> TurnAnnotation {
        TurnAnnotation {
            session_id: SessionId::new(session),
            turn_ref,
            label: label.to_string(),
            annotator: "reviewer".to_string(),
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn out_of_order_turns_reconstruct_by_sequence() {
        // Arrival order [3, 1, 2] must reconstruct to [1, 2, 3].
        let (narratives, warnings) = reconstruct(
            vec![turn("s1", 3, "c"), turn("s1", 1, "a"), turn("s1", 2, "b")],
            vec![],
        );

        assert!(warnings.is_empty());
        assert_eq!(narratives.len(), 1);
        let sequence: Vec<u64> = narratives[0].turns.iter().map(|t| t.sequence_no).collect();
        assert_eq!(sequence, vec![1, 2, 3]);
    }

    #[test]
    fn sessions_are_grouped_and_sorted() {
        let (narratives, _) = reconstruct(
            vec![turn("s2", 1, "x"), turn("s1", 1, "y"), turn("s2", 2, "z")],
            vec![],
        );

        assert_eq!(narratives.len(), 2);
        assert_eq!(narratives[0].session_id, SessionId::new("s1"));
        assert_eq!(narratives[1].session_id, SessionId::new("s2"));
        assert_eq!(narratives[1].turns.len(), 2);
    }

    #[test]
    fn matching_annotations_are_overlaid() {
        let (narratives, warnings) = reconstruct(
            vec![turn("s1", 1, "a"), turn("s1", 2, "b")],
            vec![annotation("s1", 2, "flagged")],
        );

        assert!(warnings.is_empty());
        assert_eq!(narratives[0].annotations.len(), 1);
        assert_eq!(narratives[0].annotations[0].turn_ref, 2);
    }

    #[test]
    fn annotation_on_missing_turn_warns_and_is_dropped() {
        let (narratives, warnings) = reconstruct(
            vec![turn("s1", 1, "a")],
            vec![annotation("s1", 7, "dangling"), annotation("s2", 1, "no session")],
        );

        assert_eq!(narratives.len(), 1);
        assert!(narratives[0].annotations.is_empty());
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("missing turn 7"));
    }
}
