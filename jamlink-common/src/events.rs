//! Event types for the Jamlink event system
//!
//! Provides shared event definitions and the EventBus the workflow engine
//! publishes to. The excluded UI layer subscribes to maintain live views
//! without polling; none of the workflow logic reads events back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{ApplicationStatus, CollaborationStatus, InvitationStatus};

/// Jamlink engine events
///
/// Events are broadcast via [`EventBus`] after the primary store write has
/// committed, and can be serialized for transport to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JamlinkEvent {
    /// A collaboration was created
    CollaborationCreated {
        collaboration_id: String,
        creator_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Collaboration fields were updated (not status or roster)
    CollaborationUpdated {
        collaboration_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Collaboration lifecycle status changed
    CollaborationStatusChanged {
        collaboration_id: String,
        old_status: CollaborationStatus,
        new_status: CollaborationStatus,
        timestamp: DateTime<Utc>,
    },

    /// A collaboration was deleted
    CollaborationDeleted {
        collaboration_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A musician joined the roster (accepted application or invitation)
    ParticipantJoined {
        collaboration_id: String,
        user_id: String,
        /// Active headcount after the join
        current_participants: u32,
        timestamp: DateTime<Utc>,
    },

    /// A participant was removed from the roster
    ParticipantRemoved {
        collaboration_id: String,
        user_id: String,
        /// Active headcount after the removal
        current_participants: u32,
        timestamp: DateTime<Utc>,
    },

    /// A musician applied to an open collaboration
    ApplicationSubmitted {
        application_id: String,
        collaboration_id: String,
        applicant_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The creator accepted or rejected an application
    ApplicationReviewed {
        application_id: String,
        collaboration_id: String,
        applicant_id: String,
        new_status: ApplicationStatus,
        timestamp: DateTime<Utc>,
    },

    /// The applicant withdrew a pending application
    ApplicationWithdrawn {
        application_id: String,
        collaboration_id: String,
        applicant_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The creator invited a musician
    InvitationSent {
        invitation_id: String,
        collaboration_id: String,
        to_user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The invitee accepted or declined
    InvitationResponded {
        invitation_id: String,
        collaboration_id: String,
        to_user_id: String,
        new_status: InvitationStatus,
        timestamp: DateTime<Utc>,
    },

    /// The creator cancelled a pending invitation
    InvitationCancelled {
        invitation_id: String,
        collaboration_id: String,
        to_user_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A cost line was appended to the budget ledger
    CostItemAdded {
        collaboration_id: String,
        cost_item_id: String,
        amount: f64,
        /// Ledger total after the append
        spent: f64,
        timestamp: DateTime<Utc>,
    },

    /// A cost line was removed from the budget ledger
    CostItemRemoved {
        collaboration_id: String,
        cost_item_id: String,
        /// Ledger total after the removal
        spent: f64,
        timestamp: DateTime<Utc>,
    },

    /// The budget total or currency was replaced
    BudgetTotalChanged {
        collaboration_id: String,
        total: f64,
        currency: String,
        timestamp: DateTime<Utc>,
    },
}

impl JamlinkEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            JamlinkEvent::CollaborationCreated { .. } => "CollaborationCreated",
            JamlinkEvent::CollaborationUpdated { .. } => "CollaborationUpdated",
            JamlinkEvent::CollaborationStatusChanged { .. } => "CollaborationStatusChanged",
            JamlinkEvent::CollaborationDeleted { .. } => "CollaborationDeleted",
            JamlinkEvent::ParticipantJoined { .. } => "ParticipantJoined",
            JamlinkEvent::ParticipantRemoved { .. } => "ParticipantRemoved",
            JamlinkEvent::ApplicationSubmitted { .. } => "ApplicationSubmitted",
            JamlinkEvent::ApplicationReviewed { .. } => "ApplicationReviewed",
            JamlinkEvent::ApplicationWithdrawn { .. } => "ApplicationWithdrawn",
            JamlinkEvent::InvitationSent { .. } => "InvitationSent",
            JamlinkEvent::InvitationResponded { .. } => "InvitationResponded",
            JamlinkEvent::InvitationCancelled { .. } => "InvitationCancelled",
            JamlinkEvent::CostItemAdded { .. } => "CostItemAdded",
            JamlinkEvent::CostItemRemoved { .. } => "CostItemRemoved",
            JamlinkEvent::BudgetTotalChanged { .. } => "BudgetTotalChanged",
        }
    }
}

/// Central event distribution bus for engine-wide events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block the engine)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JamlinkEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events. Events emitted before subscription
    /// are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<JamlinkEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring whether anyone is listening.
    ///
    /// Engine mutations use this exclusively: event delivery is advisory
    /// and must never affect the outcome of the primary write.
    pub fn emit_lossy(&self, event: JamlinkEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
