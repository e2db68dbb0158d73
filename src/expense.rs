//! Adding, editing and analysing expenses.

use std::{collections::BTreeMap, sync::Arc};

use time::{Date, OffsetDateTime};

use crate::{
    Error,
    budget::round_to_tenths,
    category::{Category, CategoryFilter},
    record::{Expense, ExpenseId},
    storage::{RecordStore, Storage},
};

/// The details of an expense to add.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpense {
    /// What the money was spent on, must not be blank.
    pub description: String,
    /// How much was spent, must be a finite number greater than zero.
    pub amount: f64,
    /// The classification of the expense.
    pub category: Category,
    /// The day the money was spent.
    pub date: Date,
}

/// The fields of an expense to change, `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpenseChanges {
    /// The new description.
    pub description: Option<String>,
    /// The new amount.
    pub amount: Option<f64>,
    /// The new category.
    pub category: Option<Category>,
    /// The new date.
    pub date: Option<Date>,
}

impl ExpenseChanges {
    /// Whether no field would change.
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.amount.is_none()
            && self.category.is_none()
            && self.date.is_none()
    }
}

/// Spending in one category.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryStatistics {
    /// The sum of the category's expenses.
    pub total: f64,
    /// The number of expenses in the category.
    pub count: usize,
    /// The category's share of all spending in percent, to one decimal place.
    pub percentage: f64,
}

/// Parse an amount typed in by the user.
///
/// # Errors
/// Returns [Error::InvalidAmount] if `text` is not a finite number greater than zero.
pub fn parse_amount(text: &str) -> Result<f64, Error> {
    let amount = text
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::InvalidAmount(text.to_owned()))?;

    validate_amount(amount)
}

fn validate_amount(amount: f64) -> Result<f64, Error> {
    if amount.is_finite() && amount > 0.0 {
        Ok(amount)
    } else {
        Err(Error::InvalidAmount(amount.to_string()))
    }
}

fn validate_description(description: &str) -> Result<String, Error> {
    let description = description.trim();

    if description.is_empty() {
        Err(Error::EmptyDescription)
    } else {
        Ok(description.to_owned())
    }
}

/// Reads and writes the expenses of the record in a [RecordStore].
pub struct ExpenseManager<S = Storage> {
    store: Arc<S>,
}

impl<S> Clone for ExpenseManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: RecordStore> ExpenseManager<S> {
    /// Manage the expenses of the record in `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The expenses passing `filter`, in the order they were added.
    pub async fn list(&self, filter: CategoryFilter) -> Vec<Expense> {
        self.store
            .read()
            .await
            .expenses
            .into_iter()
            .filter(|expense| filter.matches(expense.category))
            .collect()
    }

    /// Validate and store a new expense, returning it with its ID and creation time.
    ///
    /// # Errors
    /// Returns [Error::EmptyDescription] or [Error::InvalidAmount] if the
    /// expense is invalid, or an error if the record could not be read or
    /// written. Nothing is stored on error.
    pub async fn add(&self, new_expense: NewExpense) -> Result<Expense, Error> {
        let description = validate_description(&new_expense.description)?;
        let amount = validate_amount(new_expense.amount)?;

        let expense = Expense {
            id: ExpenseId::generate(),
            description,
            amount,
            category: new_expense.category,
            date: new_expense.date,
            created_at: Some(OffsetDateTime::now_utc()),
            updated_at: None,
        };

        let mut record = self.store.try_read().await?;
        record.expenses.push(expense.clone());
        record.stamp_created_at();
        self.store.write(&record).await?;

        tracing::info!("added expense {}", expense.id);

        Ok(expense)
    }

    /// Apply `changes` to the expense with `id`.
    ///
    /// Returns `None`, without writing, if there is no such expense.
    ///
    /// # Errors
    /// Returns [Error::EmptyDescription] or [Error::InvalidAmount] if the
    /// changed expense would be invalid, or an error if the record could not be
    /// read or written. Nothing is stored on error.
    pub async fn update(
        &self,
        id: &ExpenseId,
        changes: ExpenseChanges,
    ) -> Result<Option<Expense>, Error> {
        let mut record = self.store.try_read().await?;

        let Some(expense) = record.expenses.iter_mut().find(|expense| &expense.id == id) else {
            return Ok(None);
        };

        if let Some(description) = changes.description {
            expense.description = validate_description(&description)?;
        }
        if let Some(amount) = changes.amount {
            expense.amount = validate_amount(amount)?;
        }
        if let Some(category) = changes.category {
            expense.category = category;
        }
        if let Some(date) = changes.date {
            expense.date = date;
        }
        expense.updated_at = Some(OffsetDateTime::now_utc());

        let updated = expense.clone();
        self.store.write(&record).await?;

        tracing::info!("updated expense {id}");

        Ok(Some(updated))
    }

    /// Delete the expense with `id`.
    ///
    /// Returns `false`, without writing, if there is no such expense.
    ///
    /// # Errors
    /// Returns an error if the record could not be read or written.
    pub async fn remove(&self, id: &ExpenseId) -> Result<bool, Error> {
        let mut record = self.store.try_read().await?;

        let count = record.expenses.len();
        record.expenses.retain(|expense| &expense.id != id);
        if record.expenses.len() == count {
            return Ok(false);
        }

        self.store.write(&record).await?;
        tracing::info!("removed expense {id}");

        Ok(true)
    }

    /// The sum of every expense.
    pub async fn total(&self) -> f64 {
        self.store.read().await.total_spent()
    }

    /// Spending per category, only for categories with at least one expense.
    pub async fn statistics_by_category(&self) -> BTreeMap<Category, CategoryStatistics> {
        let expenses = self.store.read().await.expenses;
        let grand_total: f64 = expenses.iter().map(|expense| expense.amount).sum();

        let mut statistics = BTreeMap::new();
        for expense in &expenses {
            let entry = statistics
                .entry(expense.category)
                .or_insert(CategoryStatistics {
                    total: 0.0,
                    count: 0,
                    percentage: 0.0,
                });
            entry.total += expense.amount;
            entry.count += 1;
        }

        if grand_total > 0.0 {
            for entry in statistics.values_mut() {
                entry.percentage = round_to_tenths(entry.total * 100.0 / grand_total);
            }
        }

        statistics
    }

    /// The `count` latest expenses by date, most recently added first within a day.
    pub async fn recent(&self, count: usize) -> Vec<Expense> {
        let mut expenses = self.store.read().await.expenses;

        expenses.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        expenses.truncate(count);

        expenses
    }

    /// The expenses dated from `start` to `end`, both inclusive.
    pub async fn by_date_range(&self, start: Date, end: Date) -> Vec<Expense> {
        self.store
            .read()
            .await
            .expenses
            .into_iter()
            .filter(|expense| (start..=end).contains(&expense.date))
            .collect()
    }

    /// The average spent per day since the earliest expense, up to today.
    pub async fn average_daily_spend(&self) -> f64 {
        let today = OffsetDateTime::now_local()
            .unwrap_or_else(|_| OffsetDateTime::now_utc())
            .date();

        self.average_daily_spend_as_of(today).await
    }

    /// The average spent per day from the earliest expense to `today`.
    ///
    /// Spending is spread over at least one day and the average is zero when
    /// there are no expenses.
    pub async fn average_daily_spend_as_of(&self, today: Date) -> f64 {
        let record = self.store.read().await;

        let Some(earliest) = record.expenses.iter().map(|expense| expense.date).min() else {
            return 0.0;
        };

        let days = (today - earliest).whole_days().max(1);

        record.total_spent() / days as f64
    }
}
