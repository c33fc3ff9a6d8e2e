//! Open-call application records
//!
//! Application state machine: `pending -> {accepted, rejected, withdrawn}`.
//! All three outcomes are terminal; status is write-once after leaving
//! `pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Application workflow state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApplicationStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }
}

impl std::fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open-call request to join a collaboration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub collaboration_id: String,
    pub applicant_id: String,
    pub applicant_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant_avatar: Option<String>,
    pub instrument: String,
    pub experience: String,
    pub motivation: String,
    pub status: ApplicationStatus,
    pub applied_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_message: Option<String>,
}

/// Input for submitting an application; validated before any store call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewApplication {
    pub collaboration_id: String,
    pub applicant_id: String,
    pub applicant_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applicant_avatar: Option<String>,
    pub instrument: String,
    pub experience: String,
    pub motivation: String,
}

impl NewApplication {
    pub fn validate(&self) -> Result<()> {
        if self.collaboration_id.trim().is_empty() {
            return Err(Error::Validation("collaborationId is required".into()));
        }
        if self.applicant_id.trim().is_empty() {
            return Err(Error::Validation("applicantId is required".into()));
        }
        if self.instrument.trim().is_empty() {
            return Err(Error::Validation("instrument is required".into()));
        }
        if self.motivation.trim().is_empty() {
            return Err(Error::Validation("motivation is required".into()));
        }
        Ok(())
    }
}
