//! Internal helpers for loading and parsing workflow documents

use jamlink_common::models::{Application, Collaboration, Invitation};
use jamlink_common::store::{Document, DocumentStore};
use jamlink_common::{Error, Result};

use crate::collections;

pub(crate) async fn load_collaboration(
    store: &dyn DocumentStore,
    id: &str,
) -> Result<(Document, Collaboration)> {
    let doc = store
        .get(collections::COLLABORATIONS, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("collaboration {id}")))?;
    let collaboration: Collaboration = serde_json::from_value(doc.body.clone())?;
    Ok((doc, collaboration))
}

pub(crate) async fn load_application(
    store: &dyn DocumentStore,
    id: &str,
) -> Result<(Document, Application)> {
    let doc = store
        .get(collections::APPLICATIONS, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("application {id}")))?;
    let application: Application = serde_json::from_value(doc.body.clone())?;
    Ok((doc, application))
}

pub(crate) async fn load_invitation(
    store: &dyn DocumentStore,
    id: &str,
) -> Result<(Document, Invitation)> {
    let doc = store
        .get(collections::INVITATIONS, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("invitation {id}")))?;
    let invitation: Invitation = serde_json::from_value(doc.body.clone())?;
    Ok((doc, invitation))
}

/// Reject workflow mutations once a collaboration is soft-terminal.
///
/// `attempted` names the rejected operation and lands in the error's `to`
/// field so callers can tell which mutation bounced.
pub(crate) fn terminal_guard(collaboration: &Collaboration, attempted: &str) -> Result<()> {
    if collaboration.status.is_terminal() {
        return Err(Error::invalid_transition(collaboration.status, attempted));
    }
    Ok(())
}
