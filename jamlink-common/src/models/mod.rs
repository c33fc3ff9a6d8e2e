//! Domain models for the collaboration platform
//!
//! Document shapes match the platform's JSON documents field-for-field
//! (camelCase keys, status values in snake_case), so a model serializes to
//! exactly what the store holds.

pub mod application;
pub mod collaboration;
pub mod invitation;

pub use application::{Application, ApplicationStatus, NewApplication};
pub use collaboration::{
    Budget, BudgetSummary, Collaboration, CollaborationStatus, CostCategory, CostItem, CostStatus,
    Milestone, NewCollaboration, NewCostItem, Participant, ParticipantStatus, Privacy, Timeline,
};
pub use invitation::{Invitation, InvitationStatus, NewInvitation};

/// Display profile for a user joining a roster.
///
/// Supplied by the caller (the UI layer holds the signed-in user context);
/// the engine never reads user profile documents itself.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_avatar: Option<String>,
    pub role: String,
    pub instrument: String,
}
