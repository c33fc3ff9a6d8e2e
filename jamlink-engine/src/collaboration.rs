//! Collaboration record manager
//!
//! CRUD and lifecycle transitions for a single collaboration project. The
//! creator occupies the first roster slot from the moment of creation, so
//! the headcount counter and the roster never disagree, even before anyone
//! else joins.

use std::sync::Arc;

use chrono::Utc;
use jamlink_common::events::{EventBus, JamlinkEvent};
use jamlink_common::models::{
    Collaboration, CollaborationStatus, NewCollaboration, Participant, ParticipantStatus, Privacy,
};
use jamlink_common::retry::{with_retry, RetryPolicy};
use jamlink_common::store::{ChangeStream, DocumentStore, Query, WriteOp};
use jamlink_common::{Error, Result};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::collections;
use crate::docs::load_collaboration;

/// Fields owned by the roster, the counters or the ledger. A partial update
/// arriving through `update` must not touch them; doing so would silently
/// clobber state that concurrent workflow writes maintain.
const MANAGED_FIELDS: &[&str] = &[
    "id",
    "creatorId",
    "createdAt",
    "status",
    "participants",
    "currentParticipants",
    "views",
    "applications",
    "budget",
];

pub struct CollaborationManager {
    store: Arc<dyn DocumentStore>,
    events: EventBus,
    policy: RetryPolicy,
}

impl CollaborationManager {
    pub fn new(store: Arc<dyn DocumentStore>, events: EventBus, policy: RetryPolicy) -> Self {
        Self { store, events, policy }
    }

    /// Create a collaboration. The creator is seeded as the first active
    /// participant and counted in `currentParticipants`.
    pub async fn create(&self, input: NewCollaboration) -> Result<Collaboration> {
        input.validate()?;
        let now = Utc::now();

        let creator = Participant {
            user_id: input.creator_id.clone(),
            user_name: input.creator_name.clone(),
            user_avatar: input.creator_avatar.clone(),
            role: "creator".to_string(),
            instrument: input.creator_instrument.clone().unwrap_or_default(),
            joined_at: now,
            status: ParticipantStatus::Active,
        };

        let collaboration = Collaboration {
            id: Uuid::new_v4().to_string(),
            creator_id: input.creator_id,
            title: input.title,
            description: input.description,
            genre: input.genre,
            instruments: input.instruments,
            collaboration_type: input.collaboration_type,
            status: CollaborationStatus::Open,
            privacy: input.privacy.unwrap_or(Privacy::Public),
            max_participants: input.max_participants,
            current_participants: 1,
            participants: vec![creator],
            requirements: input.requirements,
            timeline: input.timeline,
            views: 0,
            applications: 0,
            budget: None,
            tags: input.tags,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.store
            .create(
                collections::COLLABORATIONS,
                &collaboration.id,
                serde_json::to_value(&collaboration)?,
            )
            .await?;

        tracing::info!(
            collaboration_id = %collaboration.id,
            creator_id = %collaboration.creator_id,
            "Collaboration created"
        );
        self.events.emit_lossy(JamlinkEvent::CollaborationCreated {
            collaboration_id: collaboration.id.clone(),
            creator_id: collaboration.creator_id.clone(),
            timestamp: now,
        });
        Ok(collaboration)
    }

    pub async fn get(&self, id: &str) -> Result<Collaboration> {
        let (_, collaboration) = load_collaboration(self.store.as_ref(), id).await?;
        Ok(collaboration)
    }

    /// Merge presentational fields into the record and stamp `updatedAt`.
    ///
    /// Patches touching roster-managed or counter fields are rejected:
    /// those move only through their owning workflow (`set_status`, the
    /// roster, the ledger, the engagement counters).
    pub async fn update(&self, id: &str, patch: Value) -> Result<()> {
        let Value::Object(mut fields) = patch else {
            return Err(Error::Validation("update patch must be an object".into()));
        };
        for key in fields.keys() {
            if MANAGED_FIELDS.contains(&key.as_str()) {
                return Err(Error::Validation(format!(
                    "field '{key}' cannot be set through update"
                )));
            }
        }
        fields.insert("updatedAt".to_string(), json!(Utc::now()));

        self.store
            .update(collections::COLLABORATIONS, id, Value::Object(fields))
            .await?;

        self.events.emit_lossy(JamlinkEvent::CollaborationUpdated {
            collaboration_id: id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Hard delete, with best-effort cleanup of the collaboration's
    /// applications and invitations so they don't linger as orphans.
    /// Cleanup failures are logged, never surfaced: the primary delete has
    /// already committed.
    pub async fn delete(&self, id: &str) -> Result<()> {
        // Existence check first so a bad id surfaces as NotFound.
        let _ = load_collaboration(self.store.as_ref(), id).await?;

        self.store.delete(collections::COLLABORATIONS, id).await?;
        tracing::info!(collaboration_id = id, "Collaboration deleted");
        self.events.emit_lossy(JamlinkEvent::CollaborationDeleted {
            collaboration_id: id.to_string(),
            timestamp: Utc::now(),
        });

        for collection in [collections::APPLICATIONS, collections::INVITATIONS] {
            let query = Query::collection(collection).filter("collaborationId", id);
            match self.store.query(&query).await {
                Ok(docs) => {
                    for doc in docs {
                        if let Err(err) = self.store.delete(collection, &doc.id).await {
                            tracing::warn!(
                                collaboration_id = id,
                                collection,
                                document_id = %doc.id,
                                error = %err,
                                "Failed to clean up dependent record"
                            );
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        collaboration_id = id,
                        collection,
                        error = %err,
                        "Failed to enumerate dependent records for cleanup"
                    );
                }
            }
        }
        Ok(())
    }

    /// Lifecycle transition following the status table; anything else is
    /// `InvalidTransition`.
    pub async fn set_status(
        &self,
        id: &str,
        new_status: CollaborationStatus,
    ) -> Result<Collaboration> {
        with_retry("collaboration.set_status", &self.policy, || {
            self.try_set_status(id, new_status)
        })
        .await
    }

    async fn try_set_status(
        &self,
        id: &str,
        new_status: CollaborationStatus,
    ) -> Result<Collaboration> {
        let (doc, mut collaboration) = load_collaboration(self.store.as_ref(), id).await?;

        if !collaboration.status.can_transition_to(new_status) {
            return Err(Error::invalid_transition(collaboration.status, new_status));
        }

        let old_status = collaboration.status;
        let now = Utc::now();
        self.store
            .commit(vec![WriteOp::Update {
                collection: collections::COLLABORATIONS.to_string(),
                id: id.to_string(),
                patch: json!({"status": new_status, "updatedAt": now}),
                expect_version: Some(doc.version),
            }])
            .await?;

        collaboration.status = new_status;
        collaboration.updated_at = now;

        tracing::info!(
            collaboration_id = id,
            old_status = %old_status,
            new_status = %new_status,
            "Collaboration status changed"
        );
        self.events.emit_lossy(JamlinkEvent::CollaborationStatusChanged {
            collaboration_id: id.to_string(),
            old_status,
            new_status,
            timestamp: now,
        });
        Ok(collaboration)
    }

    /// Append a tag without clobbering concurrent tag edits.
    ///
    /// Uses the store's atomic array union, so two clients tagging at once
    /// both land and an existing tag is not duplicated.
    pub async fn add_tag(&self, id: &str, tag: &str) -> Result<()> {
        if tag.trim().is_empty() {
            return Err(Error::Validation("tag must not be empty".into()));
        }
        self.store
            .union_append(collections::COLLABORATIONS, id, "tags", json!(tag))
            .await?;

        self.events.emit_lossy(JamlinkEvent::CollaborationUpdated {
            collaboration_id: id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Live view of one collaboration document.
    pub async fn subscribe(&self, id: &str) -> Result<ChangeStream> {
        self.store
            .subscribe(Query::collection(collections::COLLABORATIONS).filter("id", id))
            .await
    }
}
