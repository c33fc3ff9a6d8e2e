//! Engagement counters
//!
//! View and application counts are best-effort analytics, not workflow
//! state: they use the store's atomic per-document increment and swallow
//! failures so a counter hiccup can never break a page load or an apply.

use std::sync::Arc;

use jamlink_common::store::DocumentStore;

use crate::collections;

pub struct EngagementCounters {
    store: Arc<dyn DocumentStore>,
}

impl EngagementCounters {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Fire-and-forget view count bump.
    pub async fn increment_views(&self, collaboration_id: &str) {
        if let Err(err) = self
            .store
            .increment(collections::COLLABORATIONS, collaboration_id, "views", 1)
            .await
        {
            tracing::warn!(
                collaboration_id,
                error = %err,
                "Failed to record view; continuing"
            );
        }
    }
}
