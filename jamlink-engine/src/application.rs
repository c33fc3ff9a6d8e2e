//! Application workflow
//!
//! Open-call applications: apply, review (accept/reject), withdraw. An
//! accept is one conditional commit covering both the application's status
//! transition and the roster append, so a crash or a lost race can never
//! leave an accepted application without its roster effect (or a
//! double-join). Notifications and the `applications` counter are
//! best-effort side effects dispatched after the commit.
//!
//! Pending applications carry no ordering or queue position; the creator
//! reviews them at their discretion.

use std::sync::Arc;

use chrono::Utc;
use jamlink_common::events::{EventBus, JamlinkEvent};
use jamlink_common::models::{
    Application, ApplicationStatus, NewApplication, Participant, ParticipantStatus,
};
use jamlink_common::retry::{with_retry, RetryPolicy};
use jamlink_common::store::{ChangeStream, DocumentStore, Query, WriteOp};
use jamlink_common::{Error, Result};
use serde_json::json;
use uuid::Uuid;

use crate::collections;
use crate::docs::{load_application, load_collaboration, terminal_guard};
use crate::notify::{NotificationKind, Notifier};
use crate::roster::Roster;

/// Creator's verdict on a pending application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Accepted,
    Rejected,
}

impl ReviewDecision {
    fn status(&self) -> ApplicationStatus {
        match self {
            ReviewDecision::Accepted => ApplicationStatus::Accepted,
            ReviewDecision::Rejected => ApplicationStatus::Rejected,
        }
    }
}

pub struct ApplicationWorkflow {
    store: Arc<dyn DocumentStore>,
    events: EventBus,
    policy: RetryPolicy,
    notifier: Notifier,
}

impl ApplicationWorkflow {
    pub fn new(store: Arc<dyn DocumentStore>, events: EventBus, policy: RetryPolicy) -> Self {
        let notifier = Notifier::new(store.clone());
        Self {
            store,
            events,
            policy,
            notifier,
        }
    }

    /// Submit an application to an open collaboration.
    ///
    /// One outstanding application per `(collaboration, applicant)` pair:
    /// a second apply while one is pending fails with
    /// `DuplicateApplication`. A past rejected/withdrawn application does
    /// not block re-applying.
    pub async fn apply(&self, input: NewApplication) -> Result<Application> {
        input.validate()?;

        let (_, collaboration) =
            load_collaboration(self.store.as_ref(), &input.collaboration_id).await?;
        if collaboration.status != jamlink_common::models::CollaborationStatus::Open {
            return Err(Error::invalid_transition(collaboration.status, "application"));
        }

        let pending = self
            .store
            .query(
                &Query::collection(collections::APPLICATIONS)
                    .filter("collaborationId", input.collaboration_id.as_str())
                    .filter("applicantId", input.applicant_id.as_str())
                    .filter("status", ApplicationStatus::Pending.as_str())
                    .limit(1),
            )
            .await?;
        if !pending.is_empty() {
            return Err(Error::DuplicateApplication);
        }

        let application = Application {
            id: Uuid::new_v4().to_string(),
            collaboration_id: input.collaboration_id,
            applicant_id: input.applicant_id,
            applicant_name: input.applicant_name,
            applicant_avatar: input.applicant_avatar,
            instrument: input.instrument,
            experience: input.experience,
            motivation: input.motivation,
            status: ApplicationStatus::Pending,
            applied_at: Utc::now(),
            responded_at: None,
            response_message: None,
        };

        self.store
            .create(
                collections::APPLICATIONS,
                &application.id,
                serde_json::to_value(&application)?,
            )
            .await?;

        tracing::info!(
            application_id = %application.id,
            collaboration_id = %application.collaboration_id,
            applicant_id = %application.applicant_id,
            "Application submitted"
        );

        // Best-effort side effects: the application itself is already in.
        if let Err(err) = self
            .store
            .increment(
                collections::COLLABORATIONS,
                &application.collaboration_id,
                "applications",
                1,
            )
            .await
        {
            tracing::warn!(
                collaboration_id = %application.collaboration_id,
                error = %err,
                "Failed to bump application counter; continuing"
            );
        }
        self.notifier
            .send(
                &collaboration.creator_id,
                NotificationKind::ApplicationSubmitted,
                &application.collaboration_id,
                &application.applicant_id,
                &application.motivation,
            )
            .await;
        self.events.emit_lossy(JamlinkEvent::ApplicationSubmitted {
            application_id: application.id.clone(),
            collaboration_id: application.collaboration_id.clone(),
            applicant_id: application.applicant_id.clone(),
            timestamp: application.applied_at,
        });

        Ok(application)
    }

    /// Accept or reject a pending application. Creator only.
    ///
    /// On accept, the status transition and the roster append commit
    /// atomically; `RosterFull` leaves both the application and the roster
    /// untouched.
    pub async fn review(
        &self,
        application_id: &str,
        reviewer_id: &str,
        decision: ReviewDecision,
        message: Option<String>,
    ) -> Result<Application> {
        with_retry("application.review", &self.policy, || {
            let message = message.clone();
            async move {
                self.try_review(application_id, reviewer_id, decision, message)
                    .await
            }
        })
        .await
    }

    async fn try_review(
        &self,
        application_id: &str,
        reviewer_id: &str,
        decision: ReviewDecision,
        message: Option<String>,
    ) -> Result<Application> {
        let (app_doc, mut application) =
            load_application(self.store.as_ref(), application_id).await?;
        if application.status.is_terminal() {
            return Err(Error::invalid_transition(application.status, decision.status()));
        }

        let (collab_doc, collaboration) =
            load_collaboration(self.store.as_ref(), &application.collaboration_id).await?;
        if collaboration.creator_id != reviewer_id {
            return Err(Error::Forbidden(
                "only the collaboration creator may review applications".into(),
            ));
        }

        let now = Utc::now();
        application.status = decision.status();
        application.responded_at = Some(now);
        application.response_message = message;

        let mut ops = vec![WriteOp::Update {
            collection: collections::APPLICATIONS.to_string(),
            id: application.id.clone(),
            patch: json!({
                "status": application.status,
                "respondedAt": now,
                "responseMessage": application.response_message,
            }),
            expect_version: Some(app_doc.version),
        }];

        let mut joined_count = None;
        if decision == ReviewDecision::Accepted {
            terminal_guard(&collaboration, "participant_join")?;
            let participant = Participant {
                user_id: application.applicant_id.clone(),
                user_name: application.applicant_name.clone(),
                user_avatar: application.applicant_avatar.clone(),
                role: "musician".to_string(),
                instrument: application.instrument.clone(),
                joined_at: now,
                status: ParticipantStatus::Active,
            };
            // Capacity check lives inside the prepared write: a full roster
            // fails the whole review before anything commits.
            if let Some(append) = Roster::prepare_add(&collab_doc, &collaboration, &participant)? {
                joined_count = Some(append.new_count);
                ops.push(append.op);
            }
        }

        self.store.commit(ops).await?;

        tracing::info!(
            application_id,
            collaboration_id = %application.collaboration_id,
            decision = %application.status,
            "Application reviewed"
        );

        let kind = match decision {
            ReviewDecision::Accepted => NotificationKind::ApplicationAccepted,
            ReviewDecision::Rejected => NotificationKind::ApplicationRejected,
        };
        self.notifier
            .send(
                &application.applicant_id,
                kind,
                &application.collaboration_id,
                reviewer_id,
                application.response_message.as_deref().unwrap_or_default(),
            )
            .await;

        self.events.emit_lossy(JamlinkEvent::ApplicationReviewed {
            application_id: application.id.clone(),
            collaboration_id: application.collaboration_id.clone(),
            applicant_id: application.applicant_id.clone(),
            new_status: application.status,
            timestamp: now,
        });
        if let Some(current_participants) = joined_count {
            self.events.emit_lossy(JamlinkEvent::ParticipantJoined {
                collaboration_id: application.collaboration_id.clone(),
                user_id: application.applicant_id.clone(),
                current_participants,
                timestamp: now,
            });
        }

        Ok(application)
    }

    /// Withdraw a pending application. Applicant only.
    pub async fn withdraw(&self, application_id: &str, caller_id: &str) -> Result<Application> {
        with_retry("application.withdraw", &self.policy, || {
            self.try_withdraw(application_id, caller_id)
        })
        .await
    }

    async fn try_withdraw(&self, application_id: &str, caller_id: &str) -> Result<Application> {
        let (app_doc, mut application) =
            load_application(self.store.as_ref(), application_id).await?;
        if application.applicant_id != caller_id {
            return Err(Error::Forbidden(
                "only the applicant may withdraw an application".into(),
            ));
        }
        if application.status.is_terminal() {
            return Err(Error::invalid_transition(
                application.status,
                ApplicationStatus::Withdrawn,
            ));
        }

        let now = Utc::now();
        application.status = ApplicationStatus::Withdrawn;
        application.responded_at = Some(now);

        self.store
            .commit(vec![WriteOp::Update {
                collection: collections::APPLICATIONS.to_string(),
                id: application.id.clone(),
                patch: json!({"status": application.status, "respondedAt": now}),
                expect_version: Some(app_doc.version),
            }])
            .await?;

        tracing::info!(application_id, "Application withdrawn");
        self.events.emit_lossy(JamlinkEvent::ApplicationWithdrawn {
            application_id: application.id.clone(),
            collaboration_id: application.collaboration_id.clone(),
            applicant_id: application.applicant_id.clone(),
            timestamp: now,
        });
        Ok(application)
    }

    pub async fn get(&self, application_id: &str) -> Result<Application> {
        let (_, application) = load_application(self.store.as_ref(), application_id).await?;
        Ok(application)
    }

    /// All applications for one collaboration, newest first.
    pub async fn for_collaboration(&self, collaboration_id: &str) -> Result<Vec<Application>> {
        let docs = self
            .store
            .query(
                &Query::collection(collections::APPLICATIONS)
                    .filter("collaborationId", collaboration_id)
                    .order_by("appliedAt", true),
            )
            .await?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc.body).map_err(Error::from))
            .collect()
    }

    /// All applications submitted by one musician, newest first.
    pub async fn for_applicant(&self, applicant_id: &str) -> Result<Vec<Application>> {
        let docs = self
            .store
            .query(
                &Query::collection(collections::APPLICATIONS)
                    .filter("applicantId", applicant_id)
                    .order_by("appliedAt", true),
            )
            .await?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc.body).map_err(Error::from))
            .collect()
    }

    /// Live view of one collaboration's applications.
    pub async fn subscribe_for_collaboration(&self, collaboration_id: &str) -> Result<ChangeStream> {
        self.store
            .subscribe(
                Query::collection(collections::APPLICATIONS)
                    .filter("collaborationId", collaboration_id),
            )
            .await
    }
}
