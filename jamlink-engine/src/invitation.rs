//! Invitation workflow
//!
//! Creator-initiated, directed invitations: send (single or batch),
//! respond (accept/decline), cancel. Accepting commits the invitation's
//! status transition and the roster append in one conditional batch, the
//! same discipline as accepting an application.
//!
//! Batch sends are N independent invites: each recipient gets their own
//! outcome and a duplicate for one musician never aborts the rest.
//!
//! Cancelling a pending invitation either deletes the record (default,
//! matches the platform's historical behavior) or marks it `cancelled`,
//! per [`InvitationCancelMode`].

use std::sync::Arc;

use chrono::Utc;
use jamlink_common::config::InvitationCancelMode;
use jamlink_common::events::{EventBus, JamlinkEvent};
use jamlink_common::models::{
    Invitation, InvitationStatus, MemberProfile, NewInvitation, Participant, ParticipantStatus,
};
use jamlink_common::retry::{with_retry, RetryPolicy};
use jamlink_common::store::{ChangeStream, DocumentStore, Query, WriteOp};
use jamlink_common::{Error, Result};
use serde_json::json;
use uuid::Uuid;

use crate::collections;
use crate::docs::{load_collaboration, load_invitation, terminal_guard};
use crate::notify::{NotificationKind, Notifier};
use crate::roster::Roster;

/// Invitee's verdict on a pending invitation
#[derive(Debug, Clone)]
pub enum InviteDecision {
    /// Join the roster with this display profile
    Accepted(MemberProfile),
    Declined,
}

impl InviteDecision {
    fn status(&self) -> InvitationStatus {
        match self {
            InviteDecision::Accepted(_) => InvitationStatus::Accepted,
            InviteDecision::Declined => InvitationStatus::Declined,
        }
    }
}

/// Per-recipient result of a batch send
#[derive(Debug)]
pub struct InviteOutcome {
    pub to_user_id: String,
    pub result: Result<Invitation>,
}

pub struct InvitationWorkflow {
    store: Arc<dyn DocumentStore>,
    events: EventBus,
    policy: RetryPolicy,
    cancel_mode: InvitationCancelMode,
    notifier: Notifier,
}

impl InvitationWorkflow {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        events: EventBus,
        policy: RetryPolicy,
        cancel_mode: InvitationCancelMode,
    ) -> Self {
        let notifier = Notifier::new(store.clone());
        Self {
            store,
            events,
            policy,
            cancel_mode,
            notifier,
        }
    }

    /// Invite one musician. Creator only; at most one pending invitation
    /// per `(collaboration, musician)` pair, and musicians already on the
    /// roster (or holding an accepted invitation) cannot be re-invited.
    pub async fn invite(&self, input: NewInvitation) -> Result<Invitation> {
        input.validate()?;

        let (_, collaboration) =
            load_collaboration(self.store.as_ref(), &input.collaboration_id).await?;
        if collaboration.creator_id != input.from_user_id {
            return Err(Error::Forbidden(
                "only the collaboration creator may send invitations".into(),
            ));
        }
        terminal_guard(&collaboration, "invitation")?;

        if collaboration.is_participant(&input.to_user_id) {
            return Err(Error::AlreadyMember);
        }

        let pending = self
            .store
            .query(
                &Query::collection(collections::INVITATIONS)
                    .filter("collaborationId", input.collaboration_id.as_str())
                    .filter("toUserId", input.to_user_id.as_str())
                    .filter("status", InvitationStatus::Pending.as_str())
                    .limit(1),
            )
            .await?;
        if !pending.is_empty() {
            return Err(Error::DuplicatePendingInvitation);
        }

        let accepted = self
            .store
            .query(
                &Query::collection(collections::INVITATIONS)
                    .filter("collaborationId", input.collaboration_id.as_str())
                    .filter("toUserId", input.to_user_id.as_str())
                    .filter("status", InvitationStatus::Accepted.as_str())
                    .limit(1),
            )
            .await?;
        if !accepted.is_empty() {
            return Err(Error::AlreadyMember);
        }

        let invitation = Invitation {
            id: Uuid::new_v4().to_string(),
            collaboration_id: input.collaboration_id,
            collaboration_title: collaboration.title.clone(),
            from_user_id: input.from_user_id,
            from_user_name: input.from_user_name,
            to_user_id: input.to_user_id,
            status: InvitationStatus::Pending,
            message: input.message,
            created_at: Utc::now(),
            responded_at: None,
        };

        self.store
            .create(
                collections::INVITATIONS,
                &invitation.id,
                serde_json::to_value(&invitation)?,
            )
            .await?;

        tracing::info!(
            invitation_id = %invitation.id,
            collaboration_id = %invitation.collaboration_id,
            to_user_id = %invitation.to_user_id,
            "Invitation sent"
        );
        self.notifier
            .send(
                &invitation.to_user_id,
                NotificationKind::InvitationReceived,
                &invitation.collaboration_id,
                &invitation.from_user_id,
                &invitation.message,
            )
            .await;
        self.events.emit_lossy(JamlinkEvent::InvitationSent {
            invitation_id: invitation.id.clone(),
            collaboration_id: invitation.collaboration_id.clone(),
            to_user_id: invitation.to_user_id.clone(),
            timestamp: invitation.created_at,
        });

        Ok(invitation)
    }

    /// Invite several musicians with one message. Each recipient is an
    /// independent invite: failures are reported per recipient, never as an
    /// all-or-nothing abort.
    pub async fn invite_batch(
        &self,
        collaboration_id: &str,
        from_user_id: &str,
        from_user_name: &str,
        to_user_ids: &[String],
        message: &str,
    ) -> Vec<InviteOutcome> {
        let mut outcomes = Vec::with_capacity(to_user_ids.len());
        for to_user_id in to_user_ids {
            let result = self
                .invite(NewInvitation {
                    collaboration_id: collaboration_id.to_string(),
                    from_user_id: from_user_id.to_string(),
                    from_user_name: from_user_name.to_string(),
                    to_user_id: to_user_id.clone(),
                    message: message.to_string(),
                })
                .await;
            if let Err(err) = &result {
                tracing::warn!(
                    collaboration_id,
                    to_user_id = %to_user_id,
                    error = %err,
                    "Batch invitation failed for recipient"
                );
            }
            outcomes.push(InviteOutcome {
                to_user_id: to_user_id.clone(),
                result,
            });
        }
        outcomes
    }

    /// Accept or decline a pending invitation. Invitee only.
    ///
    /// On accept, the invitation's transition and the roster append commit
    /// atomically; a concurrent duplicate accept loses the version race and
    /// surfaces as `InvalidTransition` on retry, never as a double-join.
    pub async fn respond(
        &self,
        invitation_id: &str,
        caller_id: &str,
        decision: InviteDecision,
    ) -> Result<Invitation> {
        with_retry("invitation.respond", &self.policy, || {
            let decision = decision.clone();
            async move { self.try_respond(invitation_id, caller_id, decision).await }
        })
        .await
    }

    async fn try_respond(
        &self,
        invitation_id: &str,
        caller_id: &str,
        decision: InviteDecision,
    ) -> Result<Invitation> {
        let (inv_doc, mut invitation) =
            load_invitation(self.store.as_ref(), invitation_id).await?;
        if invitation.to_user_id != caller_id {
            return Err(Error::Forbidden(
                "only the invitee may respond to an invitation".into(),
            ));
        }
        if invitation.status.is_terminal() {
            return Err(Error::invalid_transition(invitation.status, decision.status()));
        }

        let now = Utc::now();
        invitation.status = decision.status();
        invitation.responded_at = Some(now);

        let mut ops = vec![WriteOp::Update {
            collection: collections::INVITATIONS.to_string(),
            id: invitation.id.clone(),
            patch: json!({"status": invitation.status, "respondedAt": now}),
            expect_version: Some(inv_doc.version),
        }];

        let mut joined_count = None;
        if let InviteDecision::Accepted(profile) = &decision {
            let (collab_doc, collaboration) =
                load_collaboration(self.store.as_ref(), &invitation.collaboration_id).await?;
            let participant = Participant {
                user_id: invitation.to_user_id.clone(),
                user_name: profile.user_name.clone(),
                user_avatar: profile.user_avatar.clone(),
                role: profile.role.clone(),
                instrument: profile.instrument.clone(),
                joined_at: now,
                status: ParticipantStatus::Active,
            };
            if let Some(append) = Roster::prepare_add(&collab_doc, &collaboration, &participant)? {
                joined_count = Some(append.new_count);
                ops.push(append.op);
            }
        }

        self.store.commit(ops).await?;

        tracing::info!(
            invitation_id,
            collaboration_id = %invitation.collaboration_id,
            decision = %invitation.status,
            "Invitation responded"
        );

        let kind = match invitation.status {
            InvitationStatus::Accepted => NotificationKind::InvitationAccepted,
            _ => NotificationKind::InvitationDeclined,
        };
        self.notifier
            .send(
                &invitation.from_user_id,
                kind,
                &invitation.collaboration_id,
                caller_id,
                "",
            )
            .await;

        self.events.emit_lossy(JamlinkEvent::InvitationResponded {
            invitation_id: invitation.id.clone(),
            collaboration_id: invitation.collaboration_id.clone(),
            to_user_id: invitation.to_user_id.clone(),
            new_status: invitation.status,
            timestamp: now,
        });
        if let Some(current_participants) = joined_count {
            self.events.emit_lossy(JamlinkEvent::ParticipantJoined {
                collaboration_id: invitation.collaboration_id.clone(),
                user_id: invitation.to_user_id.clone(),
                current_participants,
                timestamp: now,
            });
        }

        Ok(invitation)
    }

    /// Cancel a pending invitation. Inviter only.
    pub async fn cancel(&self, invitation_id: &str, caller_id: &str) -> Result<()> {
        with_retry("invitation.cancel", &self.policy, || {
            self.try_cancel(invitation_id, caller_id)
        })
        .await
    }

    async fn try_cancel(&self, invitation_id: &str, caller_id: &str) -> Result<()> {
        let (inv_doc, invitation) = load_invitation(self.store.as_ref(), invitation_id).await?;
        if invitation.from_user_id != caller_id {
            return Err(Error::Forbidden(
                "only the inviter may cancel an invitation".into(),
            ));
        }
        if invitation.status.is_terminal() {
            return Err(Error::invalid_transition(
                invitation.status,
                InvitationStatus::Cancelled,
            ));
        }

        // Guarded either way: a concurrent accept wins the version race and
        // this cancel resolves to InvalidTransition on the retry pass.
        let op = match self.cancel_mode {
            InvitationCancelMode::Delete => WriteOp::Delete {
                collection: collections::INVITATIONS.to_string(),
                id: invitation.id.clone(),
                expect_version: Some(inv_doc.version),
            },
            InvitationCancelMode::MarkCancelled => WriteOp::Update {
                collection: collections::INVITATIONS.to_string(),
                id: invitation.id.clone(),
                patch: json!({
                    "status": InvitationStatus::Cancelled,
                    "respondedAt": Utc::now(),
                }),
                expect_version: Some(inv_doc.version),
            },
        };
        self.store.commit(vec![op]).await?;

        tracing::info!(
            invitation_id,
            mode = ?self.cancel_mode,
            "Invitation cancelled"
        );
        self.events.emit_lossy(JamlinkEvent::InvitationCancelled {
            invitation_id: invitation.id.clone(),
            collaboration_id: invitation.collaboration_id.clone(),
            to_user_id: invitation.to_user_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn get(&self, invitation_id: &str) -> Result<Invitation> {
        let (_, invitation) = load_invitation(self.store.as_ref(), invitation_id).await?;
        Ok(invitation)
    }

    /// All invitations for one collaboration, newest first.
    pub async fn for_collaboration(&self, collaboration_id: &str) -> Result<Vec<Invitation>> {
        let docs = self
            .store
            .query(
                &Query::collection(collections::INVITATIONS)
                    .filter("collaborationId", collaboration_id)
                    .order_by("createdAt", true),
            )
            .await?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc.body).map_err(Error::from))
            .collect()
    }

    /// Pending invitations addressed to one musician, newest first.
    pub async fn pending_for_user(&self, user_id: &str) -> Result<Vec<Invitation>> {
        let docs = self
            .store
            .query(
                &Query::collection(collections::INVITATIONS)
                    .filter("toUserId", user_id)
                    .filter("status", InvitationStatus::Pending.as_str())
                    .order_by("createdAt", true),
            )
            .await?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc.body).map_err(Error::from))
            .collect()
    }

    /// Live view of invitations addressed to one musician.
    pub async fn subscribe_for_user(&self, user_id: &str) -> Result<ChangeStream> {
        self.store
            .subscribe(Query::collection(collections::INVITATIONS).filter("toUserId", user_id))
            .await
    }
}
