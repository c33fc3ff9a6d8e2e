//! Budget ledger
//!
//! Cost line items and the derived `spent` total for one collaboration.
//! The item list and the total are two fields of the same document and
//! must move together, so every mutation rewrites the whole `budget`
//! sub-document under a version guard; concurrent `add_cost` calls
//! serialize through the retry loop exactly like roster appends.

use std::sync::Arc;

use chrono::Utc;
use jamlink_common::events::{EventBus, JamlinkEvent};
use jamlink_common::models::{Budget, BudgetSummary, CostItem, CostStatus, NewCostItem};
use jamlink_common::retry::{with_retry, RetryPolicy};
use jamlink_common::store::{DocumentStore, WriteOp};
use jamlink_common::{Error, Result};
use serde_json::json;
use uuid::Uuid;

use crate::collections;
use crate::docs::{load_collaboration, terminal_guard};

pub struct BudgetLedger {
    store: Arc<dyn DocumentStore>,
    events: EventBus,
    policy: RetryPolicy,
}

impl BudgetLedger {
    pub fn new(store: Arc<dyn DocumentStore>, events: EventBus, policy: RetryPolicy) -> Self {
        Self { store, events, policy }
    }

    /// Append a cost line; `spent` grows by its amount in the same write.
    pub async fn add_cost(&self, collaboration_id: &str, input: NewCostItem) -> Result<CostItem> {
        input.validate()?;
        with_retry("budget.add_cost", &self.policy, || {
            let input = input.clone();
            async move { self.try_add_cost(collaboration_id, input).await }
        })
        .await
    }

    async fn try_add_cost(&self, collaboration_id: &str, input: NewCostItem) -> Result<CostItem> {
        let (doc, collaboration) = load_collaboration(self.store.as_ref(), collaboration_id).await?;
        terminal_guard(&collaboration, "budget_change")?;

        let mut budget = collaboration
            .budget
            .unwrap_or_else(|| Budget::new(0.0, input.currency.clone()));

        let item = CostItem {
            id: Uuid::new_v4().to_string(),
            name: input.name,
            amount: input.amount,
            currency: input.currency,
            category: input.category,
            status: CostStatus::Pending,
            date: input.date.unwrap_or_else(Utc::now),
        };
        budget.items.push(item.clone());
        budget.spent += item.amount;

        self.write_budget(collaboration_id, doc.version, &budget).await?;

        tracing::info!(
            collaboration_id,
            cost_item_id = %item.id,
            amount = item.amount,
            spent = budget.spent,
            "Cost item added"
        );
        self.events.emit_lossy(JamlinkEvent::CostItemAdded {
            collaboration_id: collaboration_id.to_string(),
            cost_item_id: item.id.clone(),
            amount: item.amount,
            spent: budget.spent,
            timestamp: Utc::now(),
        });
        Ok(item)
    }

    /// Remove a cost line if present; `spent` shrinks by its amount,
    /// floored at zero. Removing an absent item is a no-op.
    pub async fn remove_cost(&self, collaboration_id: &str, item_id: &str) -> Result<()> {
        with_retry("budget.remove_cost", &self.policy, || {
            self.try_remove_cost(collaboration_id, item_id)
        })
        .await
    }

    async fn try_remove_cost(&self, collaboration_id: &str, item_id: &str) -> Result<()> {
        let (doc, collaboration) = load_collaboration(self.store.as_ref(), collaboration_id).await?;
        terminal_guard(&collaboration, "budget_change")?;

        let Some(mut budget) = collaboration.budget else {
            return Ok(());
        };
        let Some(index) = budget.items.iter().position(|item| item.id == item_id) else {
            return Ok(());
        };

        let removed = budget.items.remove(index);
        budget.spent = (budget.spent - removed.amount).max(0.0);

        self.write_budget(collaboration_id, doc.version, &budget).await?;

        tracing::info!(
            collaboration_id,
            cost_item_id = item_id,
            spent = budget.spent,
            "Cost item removed"
        );
        self.events.emit_lossy(JamlinkEvent::CostItemRemoved {
            collaboration_id: collaboration_id.to_string(),
            cost_item_id: item_id.to_string(),
            spent: budget.spent,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Replace the budget total and currency.
    ///
    /// A total below what is already spent is suspicious but not an error
    /// (the ledger is bookkeeping, not enforcement); it is logged so the
    /// discrepancy is visible.
    pub async fn set_budget_total(
        &self,
        collaboration_id: &str,
        total: f64,
        currency: &str,
    ) -> Result<()> {
        if !(total >= 0.0) {
            return Err(Error::Validation(format!(
                "budget total must be non-negative, got {total}"
            )));
        }
        with_retry("budget.set_budget_total", &self.policy, || {
            self.try_set_total(collaboration_id, total, currency)
        })
        .await
    }

    async fn try_set_total(
        &self,
        collaboration_id: &str,
        total: f64,
        currency: &str,
    ) -> Result<()> {
        let (doc, collaboration) = load_collaboration(self.store.as_ref(), collaboration_id).await?;
        terminal_guard(&collaboration, "budget_change")?;

        let mut budget = collaboration
            .budget
            .unwrap_or_else(|| Budget::new(0.0, currency));

        if total < budget.spent {
            tracing::warn!(
                collaboration_id,
                total,
                spent = budget.spent,
                "Budget total set below amount already spent"
            );
        }
        budget.total = total;
        budget.currency = currency.to_string();

        self.write_budget(collaboration_id, doc.version, &budget).await?;

        self.events.emit_lossy(JamlinkEvent::BudgetTotalChanged {
            collaboration_id: collaboration_id.to_string(),
            total,
            currency: currency.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Derived totals: `remaining` and `progress_percent`. `None` when the
    /// collaboration has no budget yet.
    pub async fn summary(&self, collaboration_id: &str) -> Result<Option<BudgetSummary>> {
        let (_, collaboration) = load_collaboration(self.store.as_ref(), collaboration_id).await?;
        Ok(collaboration.budget.map(|budget| budget.summary()))
    }

    async fn write_budget(
        &self,
        collaboration_id: &str,
        expect_version: i64,
        budget: &Budget,
    ) -> Result<()> {
        self.store
            .commit(vec![WriteOp::Update {
                collection: collections::COLLABORATIONS.to_string(),
                id: collaboration_id.to_string(),
                patch: json!({"budget": budget, "updatedAt": Utc::now()}),
                expect_version: Some(expect_version),
            }])
            .await
    }
}
