//! Reading and setting the spending limit.

use std::sync::Arc;

use crate::{
    Error,
    storage::{RecordStore, Storage},
};

/// The share of the budget, in percent, from which spending is near the limit.
pub const NEAR_LIMIT_PERCENT: f64 = 80.0;

/// How spending compares to the budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetStatus {
    /// No budget has been set.
    NoBudget,
    /// Less than [NEAR_LIMIT_PERCENT] of the budget has been spent.
    OnTrack,
    /// At least [NEAR_LIMIT_PERCENT] of the budget has been spent.
    NearLimit,
    /// More than the budget has been spent.
    OverBudget,
}

/// The budget and spending at a glance.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetSummary {
    /// The spending limit.
    pub budget: f64,
    /// The sum of every expense.
    pub spent: f64,
    /// The budget minus what has been spent, negative when over budget.
    pub remaining: f64,
    /// The share of the budget spent in percent, to one decimal place.
    pub percent_used: f64,
    /// How spending compares to the budget.
    pub status: BudgetStatus,
}

impl BudgetSummary {
    fn new(budget: f64, spent: f64) -> Self {
        let percent = if budget > 0.0 {
            spent * 100.0 / budget
        } else {
            0.0
        };

        let status = if budget <= 0.0 {
            BudgetStatus::NoBudget
        } else if spent > budget {
            BudgetStatus::OverBudget
        } else if percent >= NEAR_LIMIT_PERCENT {
            BudgetStatus::NearLimit
        } else {
            BudgetStatus::OnTrack
        };

        Self {
            budget,
            spent,
            remaining: budget - spent,
            percent_used: round_to_tenths(percent),
            status,
        }
    }
}

/// Round to one decimal place.
pub(crate) fn round_to_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Replace NaN, infinite and negative budgets with zero.
fn coerce_budget(amount: f64) -> f64 {
    if amount.is_finite() && amount >= 0.0 {
        amount
    } else {
        0.0
    }
}

/// Read a budget typed in by the user, e.g. "2500", "$2,500.00".
///
/// Anything that is not a finite, non-negative number is read as zero.
pub fn parse_budget(text: &str) -> f64 {
    let text = text.trim();
    let text = text.strip_prefix('$').unwrap_or(text).replace(',', "");

    text.trim()
        .parse::<f64>()
        .map(coerce_budget)
        .unwrap_or(0.0)
}

/// Reads and writes the budget of the record in a [RecordStore].
pub struct BudgetManager<S = Storage> {
    store: Arc<S>,
}

impl<S> Clone for BudgetManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: RecordStore> BudgetManager<S> {
    /// Manage the budget of the record in `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The current budget, zero if none has been set.
    pub async fn get_budget(&self) -> f64 {
        self.store.read().await.budget
    }

    /// Set the budget, treating NaN, infinite and negative amounts as zero.
    ///
    /// Returns the budget that was stored.
    ///
    /// # Errors
    /// Returns an error if the record could not be read or written. The stored
    /// budget is unchanged on error.
    pub async fn set_budget(&self, amount: f64) -> Result<f64, Error> {
        let budget = coerce_budget(amount);

        let mut record = self.store.try_read().await?;
        record.budget = budget;
        record.stamp_created_at();
        self.store.write(&record).await?;

        tracing::info!("set the budget to {budget}");

        Ok(budget)
    }

    /// The budget minus the sum of every expense, negative when over budget.
    pub async fn get_remaining(&self) -> f64 {
        let record = self.store.read().await;

        record.budget - record.total_spent()
    }

    /// The budget, spending and how the two compare.
    pub async fn summary(&self) -> BudgetSummary {
        let record = self.store.read().await;

        BudgetSummary::new(record.budget, record.total_spent())
    }
}
