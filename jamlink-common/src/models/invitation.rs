//! Creator-initiated invitation records
//!
//! Invitation state machine: `pending -> {accepted, declined}`. Cancelling
//! while pending either deletes the record (default, matches the platform's
//! historical behavior) or marks it `cancelled` for an audit trail,
//! depending on engine configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Invitation workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    /// Only persisted when the engine runs with mark-cancelled mode;
    /// delete mode removes the record instead.
    Cancelled,
}

impl InvitationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
            InvitationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed request from the collaboration creator to a specific musician
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: String,
    pub collaboration_id: String,
    pub collaboration_title: String,
    pub from_user_id: String,
    pub from_user_name: String,
    pub to_user_id: String,
    pub status: InvitationStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

/// Input for sending an invitation; validated before any store call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvitation {
    pub collaboration_id: String,
    pub from_user_id: String,
    pub from_user_name: String,
    pub to_user_id: String,
    pub message: String,
}

impl NewInvitation {
    pub fn validate(&self) -> Result<()> {
        if self.collaboration_id.trim().is_empty() {
            return Err(Error::Validation("collaborationId is required".into()));
        }
        if self.from_user_id.trim().is_empty() {
            return Err(Error::Validation("fromUserId is required".into()));
        }
        if self.to_user_id.trim().is_empty() {
            return Err(Error::Validation("toUserId is required".into()));
        }
        if self.from_user_id == self.to_user_id {
            return Err(Error::Validation("cannot invite yourself".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pending_is_non_terminal() {
        assert!(!InvitationStatus::Pending.is_terminal());
        assert!(InvitationStatus::Accepted.is_terminal());
        assert!(InvitationStatus::Declined.is_terminal());
        assert!(InvitationStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_self_invitation_rejected() {
        let input = NewInvitation {
            collaboration_id: "c1".into(),
            from_user_id: "u1".into(),
            from_user_name: "Ana".into(),
            to_user_id: "u1".into(),
            message: "join us".into(),
        };
        assert!(matches!(input.validate(), Err(Error::Validation(_))));
    }
}
