//! Collaboration aggregate: record, roster, timeline and budget ledger
//!
//! The collaboration document is the one shared mutable resource with
//! multiple concurrent writers (`currentParticipants`, `budget.spent`,
//! `views`, `applications`). Mutations that span more than one of these
//! fields go through conditional writes; see the roster and budget modules
//! in the engine crate.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Collaboration lifecycle state
///
/// Allowed transitions: `open -> in_progress -> completed`, and
/// `open | in_progress -> cancelled`. `completed` and `cancelled` are
/// soft-terminal: the record survives but accepts no further roster,
/// application or budget mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationStatus {
    Open,
    InProgress,
    Completed,
    Cancelled,
}

impl CollaborationStatus {
    /// Terminal states accept no further workflow mutations.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CollaborationStatus::Completed | CollaborationStatus::Cancelled)
    }

    /// Status transition table
    pub fn can_transition_to(&self, next: CollaborationStatus) -> bool {
        use CollaborationStatus::*;
        matches!(
            (self, next),
            (Open, InProgress) | (InProgress, Completed) | (Open, Cancelled) | (InProgress, Cancelled)
        )
    }

    /// Status value as persisted in documents
    pub fn as_str(&self) -> &'static str {
        match self {
            CollaborationStatus::Open => "open",
            CollaborationStatus::InProgress => "in_progress",
            CollaborationStatus::Completed => "completed",
            CollaborationStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CollaborationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaboration visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    Public,
    Private,
    InviteOnly,
}

/// Roster membership state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Active,
    Inactive,
    Left,
}

/// A member of the collaboration roster
///
/// Owned by the collaboration aggregate; a participant has no identity
/// outside its collaboration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub user_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_avatar: Option<String>,
    pub role: String,
    pub instrument: String,
    pub joined_at: DateTime<Utc>,
    pub status: ParticipantStatus,
}

impl Participant {
    pub fn is_active(&self) -> bool {
        self.status == ParticipantStatus::Active
    }
}

/// Project timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    pub start_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

/// A named point on the timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub title: String,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
}

/// Budget cost category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Studio,
    Mixing,
    Equipment,
    Other,
}

/// Payment state of a single cost line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostStatus {
    Pending,
    Paid,
    Cancelled,
}

/// One budget line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostItem {
    pub id: String,
    pub name: String,
    pub amount: f64,
    pub currency: String,
    pub category: CostCategory,
    pub status: CostStatus,
    pub date: DateTime<Utc>,
}

/// Input for a new cost line; validated before any store call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCostItem {
    pub name: String,
    pub amount: f64,
    pub currency: String,
    pub category: CostCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

impl NewCostItem {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("cost item name is required".into()));
        }
        if !(self.amount > 0.0) {
            return Err(Error::Validation(format!(
                "cost item amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }
}

/// Budget ledger: line items and derived totals
///
/// `spent` must always equal the sum of `items[].amount`; it is maintained
/// incrementally by the budget ledger, never recomputed by readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub total: f64,
    pub currency: String,
    pub spent: f64,
    #[serde(default)]
    pub items: Vec<CostItem>,
}

impl Budget {
    pub fn new(total: f64, currency: impl Into<String>) -> Self {
        Self {
            total,
            currency: currency.into(),
            spent: 0.0,
            items: Vec::new(),
        }
    }

    /// Unspent amount, floored at zero (overspend shows as zero remaining)
    pub fn remaining(&self) -> f64 {
        (self.total - self.spent).max(0.0)
    }

    /// Percent of the total spent, rounded; zero when no total is set
    pub fn progress_percent(&self) -> u32 {
        if self.total > 0.0 {
            (self.spent / self.total * 100.0).round() as u32
        } else {
            0
        }
    }

    pub fn summary(&self) -> BudgetSummary {
        BudgetSummary {
            total: self.total,
            currency: self.currency.clone(),
            spent: self.spent,
            remaining: self.remaining(),
            progress_percent: self.progress_percent(),
        }
    }
}

/// Derived budget read model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSummary {
    pub total: f64,
    pub currency: String,
    pub spent: f64,
    pub remaining: f64,
    pub progress_percent: u32,
}

/// A musical project posted by a creator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaboration {
    pub id: String,
    pub creator_id: String,
    pub title: String,
    pub description: String,
    pub genre: String,
    #[serde(default)]
    pub instruments: BTreeSet<String>,
    pub collaboration_type: String,
    pub status: CollaborationStatus,
    pub privacy: Privacy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_participants: Option<u32>,
    pub current_participants: u32,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Timeline>,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub applications: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collaboration {
    /// Number of roster entries with `active` status. The persisted
    /// `currentParticipants` counter must equal this after every roster
    /// mutation.
    pub fn active_participant_count(&self) -> u32 {
        self.participants.iter().filter(|p| p.is_active()).count() as u32
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    /// Whether the roster can take one more participant
    pub fn has_open_slot(&self) -> bool {
        match self.max_participants {
            Some(max) => self.current_participants < max,
            None => true,
        }
    }
}

/// Input for creating a collaboration; validated before any store call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCollaboration {
    pub creator_id: String,
    pub creator_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_instrument: Option<String>,
    pub title: String,
    pub description: String,
    pub genre: String,
    #[serde(default)]
    pub instruments: BTreeSet<String>,
    pub collaboration_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy: Option<Privacy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Timeline>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewCollaboration {
    pub fn validate(&self) -> Result<()> {
        if self.creator_id.trim().is_empty() {
            return Err(Error::Validation("creatorId is required".into()));
        }
        if self.title.trim().is_empty() {
            return Err(Error::Validation("title is required".into()));
        }
        if self.description.trim().is_empty() {
            return Err(Error::Validation("description is required".into()));
        }
        if self.genre.trim().is_empty() {
            return Err(Error::Validation("genre is required".into()));
        }
        // The creator occupies the first participant slot, so a cap below
        // one can never admit anyone.
        if let Some(max) = self.max_participants {
            if max < 1 {
                return Err(Error::Validation(format!(
                    "maxParticipants must be at least 1, got {max}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(user_id: &str, status: ParticipantStatus) -> Participant {
        Participant {
            user_id: user_id.to_string(),
            user_name: format!("user {user_id}"),
            user_avatar: None,
            role: "musician".to_string(),
            instrument: "guitar".to_string(),
            joined_at: Utc::now(),
            status,
        }
    }

    fn collaboration() -> Collaboration {
        Collaboration {
            id: "c1".into(),
            creator_id: "u1".into(),
            title: "Lo-fi EP".into(),
            description: "Four tracks".into(),
            genre: "lo-fi".into(),
            instruments: BTreeSet::new(),
            collaboration_type: "remote".into(),
            status: CollaborationStatus::Open,
            privacy: Privacy::Public,
            max_participants: Some(3),
            current_participants: 1,
            participants: vec![participant("u1", ParticipantStatus::Active)],
            requirements: vec![],
            timeline: None,
            views: 0,
            applications: 0,
            budget: None,
            tags: vec![],
            attachments: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_transition_table() {
        use CollaborationStatus::*;

        assert!(Open.can_transition_to(InProgress));
        assert!(Open.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Cancelled));

        assert!(!Open.can_transition_to(Completed));
        assert!(!Open.can_transition_to(Open));
        assert!(!Completed.can_transition_to(Open));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(InProgress));
    }

    #[test]
    fn test_terminal_states() {
        assert!(CollaborationStatus::Completed.is_terminal());
        assert!(CollaborationStatus::Cancelled.is_terminal());
        assert!(!CollaborationStatus::Open.is_terminal());
        assert!(!CollaborationStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_active_participant_count_ignores_inactive() {
        let mut collab = collaboration();
        collab.participants.push(participant("u2", ParticipantStatus::Inactive));
        collab.participants.push(participant("u3", ParticipantStatus::Left));
        collab.participants.push(participant("u4", ParticipantStatus::Active));

        assert_eq!(collab.active_participant_count(), 2);
    }

    #[test]
    fn test_open_slot_respects_cap() {
        let mut collab = collaboration();
        assert!(collab.has_open_slot());

        collab.current_participants = 3;
        assert!(!collab.has_open_slot());

        collab.max_participants = None;
        assert!(collab.has_open_slot(), "no cap means always room");
    }

    #[test]
    fn test_budget_derived_totals() {
        let mut budget = Budget::new(200.0, "USD");
        budget.spent = 150.0;

        assert_eq!(budget.remaining(), 50.0);
        assert_eq!(budget.progress_percent(), 75);

        budget.spent = 250.0;
        assert_eq!(budget.remaining(), 0.0, "overspend floors remaining at 0");
        assert_eq!(budget.progress_percent(), 125);

        let empty = Budget::new(0.0, "USD");
        assert_eq!(empty.progress_percent(), 0, "no total means 0 percent");
    }

    #[test]
    fn test_new_collaboration_validation() {
        let input = NewCollaboration {
            creator_id: "u1".into(),
            creator_name: "Ana".into(),
            creator_avatar: None,
            creator_instrument: Some("drums".into()),
            title: "Lo-fi EP".into(),
            description: "Four tracks".into(),
            genre: "lo-fi".into(),
            instruments: BTreeSet::new(),
            collaboration_type: "remote".into(),
            privacy: None,
            max_participants: Some(4),
            requirements: vec![],
            timeline: None,
            tags: vec![],
        };
        assert!(input.validate().is_ok());

        let mut missing_title = input.clone();
        missing_title.title = "  ".into();
        assert!(matches!(missing_title.validate(), Err(Error::Validation(_))));

        let mut zero_cap = input.clone();
        zero_cap.max_participants = Some(0);
        assert!(matches!(zero_cap.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_cost_item_validation() {
        let item = NewCostItem {
            name: "Studio".into(),
            amount: 150.0,
            currency: "USD".into(),
            category: CostCategory::Studio,
            date: None,
        };
        assert!(item.validate().is_ok());

        let mut negative = item.clone();
        negative.amount = -10.0;
        assert!(matches!(negative.validate(), Err(Error::Validation(_))));

        let mut zero = item;
        zero.amount = 0.0;
        assert!(matches!(zero.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_document_field_names() {
        let collab = collaboration();
        let json = serde_json::to_value(&collab).expect("serialize");

        assert!(json.get("creatorId").is_some());
        assert!(json.get("currentParticipants").is_some());
        assert!(json.get("maxParticipants").is_some());
        assert_eq!(json["status"], "open");
        assert_eq!(json["privacy"], "public");
        assert_eq!(json["participants"][0]["status"], "active");
    }
}
