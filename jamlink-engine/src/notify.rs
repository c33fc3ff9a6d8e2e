//! Notification side effects
//!
//! Fire-and-forget notification documents written to each recipient's
//! `users/{uid}/notifications` subcollection after the primary write has
//! committed. The engine never reads them back; delivery is at-least-once
//! and a failed write is logged, never propagated, and never rolls back
//! the state transition that triggered it.

use std::sync::Arc;

use chrono::Utc;
use jamlink_common::store::DocumentStore;
use serde_json::json;
use uuid::Uuid;

use crate::collections;

/// What happened, from the recipient's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// A musician applied to the recipient's collaboration
    ApplicationSubmitted,
    ApplicationAccepted,
    ApplicationRejected,
    /// The recipient was invited to a collaboration
    InvitationReceived,
    InvitationAccepted,
    InvitationDeclined,
}

impl NotificationKind {
    /// Type string as stored in the notification document
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ApplicationSubmitted => "collaboration_application",
            NotificationKind::ApplicationAccepted => "application_accepted",
            NotificationKind::ApplicationRejected => "application_rejected",
            NotificationKind::InvitationReceived => "collaboration_invitation",
            NotificationKind::InvitationAccepted => "invitation_accepted",
            NotificationKind::InvitationDeclined => "invitation_declined",
        }
    }
}

pub struct Notifier {
    store: Arc<dyn DocumentStore>,
}

impl Notifier {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Write one notification document. Infallible from the caller's view.
    pub async fn send(
        &self,
        to_user_id: &str,
        kind: NotificationKind,
        collaboration_id: &str,
        from_user_id: &str,
        message: &str,
    ) {
        let id = Uuid::new_v4().to_string();
        let body = json!({
            "type": kind.as_str(),
            "collaborationId": collaboration_id,
            "fromUserId": from_user_id,
            "message": message,
            "createdAt": Utc::now(),
            "read": false,
        });

        if let Err(err) = self
            .store
            .create(&collections::notifications(to_user_id), &id, body)
            .await
        {
            tracing::warn!(
                to_user_id,
                kind = kind.as_str(),
                collaboration_id,
                error = %err,
                "Failed to write notification; primary operation unaffected"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jamlink_common::store::{MemoryStore, Query};

    #[tokio::test]
    async fn test_notification_document_shape() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(store.clone());

        notifier
            .send("u2", NotificationKind::InvitationReceived, "c1", "u1", "join my EP")
            .await;

        let docs = store
            .query(&Query::collection(&collections::notifications("u2")))
            .await
            .expect("query");
        assert_eq!(docs.len(), 1);
        let body = &docs[0].body;
        assert_eq!(body["type"], "collaboration_invitation");
        assert_eq!(body["collaborationId"], "c1");
        assert_eq!(body["fromUserId"], "u1");
        assert_eq!(body["message"], "join my EP");
        assert_eq!(body["read"], false);
    }

    #[tokio::test]
    async fn test_each_send_gets_its_own_document() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(store.clone());

        notifier
            .send("u2", NotificationKind::ApplicationAccepted, "c1", "u1", "welcome")
            .await;
        notifier
            .send("u2", NotificationKind::ApplicationAccepted, "c1", "u1", "welcome")
            .await;

        let docs = store
            .query(&Query::collection(&collections::notifications("u2")))
            .await
            .expect("query");
        assert_eq!(docs.len(), 2, "at-least-once delivery, no dedup");
    }
}
