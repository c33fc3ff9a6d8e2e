//! Participant roster
//!
//! Maintains the ordered participant list and the `currentParticipants`
//! counter of one collaboration. The two fields must move together: every
//! mutation writes both under a version guard, so concurrent writers
//! serialize through compare-and-swap instead of losing updates. After
//! every successful mutation the counter equals the number of roster
//! entries with `active` status.
//!
//! Both operations are idempotent under retry: re-adding a present user is
//! a no-op reporting `AlreadyMember`, removing an absent user is a plain
//! success (the UI updates optimistically and may re-issue either).

use std::sync::Arc;

use chrono::Utc;
use jamlink_common::events::{EventBus, JamlinkEvent};
use jamlink_common::models::{Collaboration, Participant};
use jamlink_common::retry::{with_retry, RetryPolicy};
use jamlink_common::store::{Document, DocumentStore, WriteOp};
use jamlink_common::{Error, Result};
use serde_json::json;

use crate::collections;
use crate::docs::{load_collaboration, terminal_guard};

/// Result of an add: either the user joined or was already on the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyMember,
}

/// A prepared, version-guarded roster append plus the headcount it produces.
///
/// Built against a loaded collaboration document so workflows can bundle
/// the append into the same commit as their own status transition.
pub(crate) struct RosterAppend {
    pub op: WriteOp,
    pub new_count: u32,
}

pub struct Roster {
    store: Arc<dyn DocumentStore>,
    events: EventBus,
    policy: RetryPolicy,
}

impl Roster {
    pub fn new(store: Arc<dyn DocumentStore>, events: EventBus, policy: RetryPolicy) -> Self {
        Self { store, events, policy }
    }

    /// Build the guarded write that appends `participant` to the roster
    /// seen in `doc`, or `None` when the user is already a member.
    ///
    /// Capacity and terminal-status checks happen here, inside the
    /// conditional write path: if another writer takes the last slot first,
    /// the version guard fails the commit and the retried attempt re-runs
    /// these checks against fresh state.
    pub(crate) fn prepare_add(
        doc: &Document,
        collaboration: &Collaboration,
        participant: &Participant,
    ) -> Result<Option<RosterAppend>> {
        terminal_guard(collaboration, "participant_join")?;

        if collaboration.is_participant(&participant.user_id) {
            return Ok(None);
        }
        if let Some(max) = collaboration.max_participants {
            if collaboration.current_participants >= max {
                return Err(Error::RosterFull { max });
            }
        }

        let mut participants = collaboration.participants.clone();
        participants.push(participant.clone());
        let new_count = participants.iter().filter(|p| p.is_active()).count() as u32;

        let op = WriteOp::Update {
            collection: collections::COLLABORATIONS.to_string(),
            id: collaboration.id.clone(),
            patch: json!({
                "participants": participants,
                "currentParticipants": new_count,
                "updatedAt": Utc::now(),
            }),
            expect_version: Some(doc.version),
        };
        Ok(Some(RosterAppend { op, new_count }))
    }

    /// Append a participant, upholding the capacity cap under concurrency.
    pub async fn add_participant(
        &self,
        collaboration_id: &str,
        participant: Participant,
    ) -> Result<AddOutcome> {
        with_retry("roster.add_participant", &self.policy, || {
            let participant = participant.clone();
            async move { self.try_add(collaboration_id, participant).await }
        })
        .await
    }

    async fn try_add(&self, collaboration_id: &str, participant: Participant) -> Result<AddOutcome> {
        let (doc, collaboration) = load_collaboration(self.store.as_ref(), collaboration_id).await?;

        match Self::prepare_add(&doc, &collaboration, &participant)? {
            None => Ok(AddOutcome::AlreadyMember),
            Some(append) => {
                self.store.commit(vec![append.op]).await?;

                tracing::info!(
                    collaboration_id,
                    user_id = %participant.user_id,
                    current_participants = append.new_count,
                    "Participant joined roster"
                );
                self.events.emit_lossy(JamlinkEvent::ParticipantJoined {
                    collaboration_id: collaboration_id.to_string(),
                    user_id: participant.user_id.clone(),
                    current_participants: append.new_count,
                    timestamp: Utc::now(),
                });
                Ok(AddOutcome::Added)
            }
        }
    }

    /// Remove a participant (hard removal, creator action). Removing an
    /// absent user succeeds without touching the document.
    pub async fn remove_participant(&self, collaboration_id: &str, user_id: &str) -> Result<()> {
        with_retry("roster.remove_participant", &self.policy, || {
            self.try_remove(collaboration_id, user_id)
        })
        .await
    }

    async fn try_remove(&self, collaboration_id: &str, user_id: &str) -> Result<()> {
        let (doc, collaboration) = load_collaboration(self.store.as_ref(), collaboration_id).await?;
        terminal_guard(&collaboration, "participant_removal")?;

        if !collaboration.is_participant(user_id) {
            return Ok(());
        }

        let participants: Vec<Participant> = collaboration
            .participants
            .iter()
            .filter(|p| p.user_id != user_id)
            .cloned()
            .collect();
        let new_count = participants.iter().filter(|p| p.is_active()).count() as u32;

        self.store
            .commit(vec![WriteOp::Update {
                collection: collections::COLLABORATIONS.to_string(),
                id: collaboration.id.clone(),
                patch: json!({
                    "participants": participants,
                    "currentParticipants": new_count,
                    "updatedAt": Utc::now(),
                }),
                expect_version: Some(doc.version),
            }])
            .await?;

        tracing::info!(
            collaboration_id,
            user_id,
            current_participants = new_count,
            "Participant removed from roster"
        );
        self.events.emit_lossy(JamlinkEvent::ParticipantRemoved {
            collaboration_id: collaboration_id.to_string(),
            user_id: user_id.to_string(),
            current_participants: new_count,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jamlink_common::models::{NewCollaboration, ParticipantStatus};
    use jamlink_common::store::MemoryStore;

    fn participant(user_id: &str) -> Participant {
        Participant {
            user_id: user_id.to_string(),
            user_name: format!("user {user_id}"),
            user_avatar: None,
            role: "musician".to_string(),
            instrument: "guitar".to_string(),
            joined_at: Utc::now(),
            status: ParticipantStatus::Active,
        }
    }

    async fn engine_with_collab(max: Option<u32>) -> (crate::JamlinkEngine, String) {
        let store = Arc::new(MemoryStore::new());
        let engine = crate::JamlinkEngine::new(store, Default::default());
        let collab = engine
            .collaborations
            .create(NewCollaboration {
                creator_id: "creator".into(),
                creator_name: "Ana".into(),
                creator_avatar: None,
                creator_instrument: Some("drums".into()),
                title: "Lo-fi EP".into(),
                description: "Four tracks".into(),
                genre: "lo-fi".into(),
                instruments: Default::default(),
                collaboration_type: "remote".into(),
                privacy: None,
                max_participants: max,
                requirements: vec![],
                timeline: None,
                tags: vec![],
            })
            .await
            .expect("create collaboration");
        let id = collab.id.clone();
        (engine, id)
    }

    #[tokio::test]
    async fn test_add_and_remove_keep_counter_consistent() {
        let (engine, id) = engine_with_collab(None).await;

        for user in ["a", "b", "c"] {
            let outcome = engine
                .roster
                .add_participant(&id, participant(user))
                .await
                .expect("add");
            assert_eq!(outcome, AddOutcome::Added);

            let collab = engine.collaborations.get(&id).await.expect("get");
            assert_eq!(collab.current_participants, collab.active_participant_count());
        }

        engine.roster.remove_participant(&id, "b").await.expect("remove");
        let collab = engine.collaborations.get(&id).await.expect("get");
        assert_eq!(collab.current_participants, 3, "creator + a + c");
        assert_eq!(collab.current_participants, collab.active_participant_count());
        assert!(!collab.is_participant("b"));
    }

    #[tokio::test]
    async fn test_re_add_is_noop_already_member() {
        let (engine, id) = engine_with_collab(None).await;

        engine.roster.add_participant(&id, participant("a")).await.expect("add");
        let outcome = engine
            .roster
            .add_participant(&id, participant("a"))
            .await
            .expect("re-add");
        assert_eq!(outcome, AddOutcome::AlreadyMember);

        let collab = engine.collaborations.get(&id).await.expect("get");
        assert_eq!(collab.current_participants, 2, "no double join");
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop_success() {
        let (engine, id) = engine_with_collab(None).await;

        engine
            .roster
            .remove_participant(&id, "ghost")
            .await
            .expect("removing an absent user succeeds");

        let collab = engine.collaborations.get(&id).await.expect("get");
        assert_eq!(collab.current_participants, 1);
    }

    #[tokio::test]
    async fn test_full_roster_rejects_with_roster_full() {
        let (engine, id) = engine_with_collab(Some(2)).await;

        engine.roster.add_participant(&id, participant("a")).await.expect("fills roster");

        let err = engine
            .roster
            .add_participant(&id, participant("b"))
            .await
            .expect_err("over capacity");
        assert!(matches!(err, Error::RosterFull { max: 2 }));

        let collab = engine.collaborations.get(&id).await.expect("get");
        assert_eq!(collab.current_participants, 2, "roster unchanged");
        assert!(!collab.is_participant("b"));
    }

    #[tokio::test]
    async fn test_concurrent_adds_never_exceed_cap() {
        let (engine, id) = engine_with_collab(Some(2)).await;

        // One slot left; both racers read the same state.
        let (r1, r2) = tokio::join!(
            engine.roster.add_participant(&id, participant("x")),
            engine.roster.add_participant(&id, participant("y")),
        );

        let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "exactly one racer wins the last slot");
        let failure = if r1.is_err() { r1 } else { r2 };
        assert!(matches!(failure, Err(Error::RosterFull { max: 2 })));

        let collab = engine.collaborations.get(&id).await.expect("get");
        assert_eq!(collab.current_participants, 2);
        assert_eq!(collab.active_participant_count(), 2);
    }

    #[tokio::test]
    async fn test_terminal_collaboration_rejects_roster_changes() {
        let (engine, id) = engine_with_collab(None).await;
        engine
            .collaborations
            .set_status(&id, jamlink_common::models::CollaborationStatus::Cancelled)
            .await
            .expect("cancel");

        let err = engine
            .roster
            .add_participant(&id, participant("late"))
            .await
            .expect_err("terminal");
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let err = engine
            .roster
            .remove_participant(&id, "creator")
            .await
            .expect_err("terminal");
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }
}
