//! # Jamlink Collaboration Engine
//!
//! Workflow engine for the Jamlink musician collaboration platform: the
//! collaboration lifecycle state machine, the application and invitation
//! sub-workflows, the participant roster, and the budget ledger.
//!
//! Every mutation is a short-lived request against a shared document store
//! with multiple concurrent client writers. Anything that spans more than
//! one field of the collaboration document (roster contents + headcount,
//! item list + spent total) goes through a conditional multi-op commit and
//! is retried on lost races; single-field counters (`views`,
//! `applications`) use the store's atomic increment.
//!
//! This crate is a library: it has no CLI and no HTTP surface. The UI layer
//! calls the workflow components directly and consumes the [`EventBus`] and
//! store subscriptions for live views.

pub mod application;
pub mod budget;
pub mod collaboration;
mod docs;
pub mod engagement;
pub mod invitation;
pub mod notify;
pub mod roster;

use std::sync::Arc;

use jamlink_common::config::EngineSettings;
use jamlink_common::events::{EventBus, JamlinkEvent};
use jamlink_common::retry::RetryPolicy;
use jamlink_common::store::DocumentStore;
use tokio::sync::broadcast;

pub use application::{ApplicationWorkflow, ReviewDecision};
pub use budget::BudgetLedger;
pub use collaboration::CollaborationManager;
pub use engagement::EngagementCounters;
pub use invitation::{InvitationWorkflow, InviteDecision, InviteOutcome};
pub use roster::{AddOutcome, Roster};

/// Document collections consumed by the engine
pub mod collections {
    pub const COLLABORATIONS: &str = "collaborations";
    pub const APPLICATIONS: &str = "collaborationApplications";
    pub const INVITATIONS: &str = "collaborationInvitations";

    /// Per-user notification subcollection
    pub fn notifications(user_id: &str) -> String {
        format!("users/{user_id}/notifications")
    }
}

/// All workflow components wired to one store and one event bus
pub struct JamlinkEngine {
    pub collaborations: CollaborationManager,
    pub roster: Roster,
    pub applications: ApplicationWorkflow,
    pub invitations: InvitationWorkflow,
    pub budget: BudgetLedger,
    pub engagement: EngagementCounters,
    events: EventBus,
}

impl JamlinkEngine {
    pub fn new(store: Arc<dyn DocumentStore>, settings: EngineSettings) -> Self {
        let events = EventBus::default();
        let policy = RetryPolicy::from_settings(&settings);

        Self {
            collaborations: CollaborationManager::new(store.clone(), events.clone(), policy),
            roster: Roster::new(store.clone(), events.clone(), policy),
            applications: ApplicationWorkflow::new(store.clone(), events.clone(), policy),
            invitations: InvitationWorkflow::new(
                store.clone(),
                events.clone(),
                policy,
                settings.invitation_cancel_mode,
            ),
            budget: BudgetLedger::new(store.clone(), events.clone(), policy),
            engagement: EngagementCounters::new(store),
            events,
        }
    }

    /// Subscribe to engine events (joins, reviews, budget changes, ...)
    pub fn subscribe(&self) -> broadcast::Receiver<JamlinkEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
