//! The persisted record: the budget and every expense for one user or device.
//!
//! The whole record is read, mutated and written back on every change. It is
//! serialized as JSON with camel-case field names, for example:
//!
//! ```json
//! {
//!   "budget": 5000.0,
//!   "expenses": [{
//!     "id": "lq2x9k1c-3f9a0b12",
//!     "description": "Groceries",
//!     "amount": 120.5,
//!     "category": "food",
//!     "date": "2024-03-01",
//!     "createdAt": "2024-03-01T10:00:00Z"
//!   }],
//!   "version": "1.0",
//!   "createdAt": "2024-03-01T09:00:00Z"
//! }
//! ```

use std::fmt::Display;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::{
    Date, OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description,
};
use uuid::Uuid;

use crate::{Error, category::Category};

/// The version written into new records.
pub const RECORD_VERSION: &str = "1.0";

/// The largest serialized record, in bytes, that the local store accepts.
pub const MAX_RECORD_BYTES: usize = 5 * 1024 * 1024;

const DATE_FORMAT: &[BorrowedFormatItem] = format_description!("[year]-[month]-[day]");

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Parse a calendar date in the `YYYY-MM-DD` format.
///
/// # Errors
/// Returns [Error::InvalidDate] if `text` is not a valid date.
pub fn parse_date(text: &str) -> Result<Date, Error> {
    Date::parse(text.trim(), DATE_FORMAT).map_err(|_| Error::InvalidDate(text.to_owned()))
}

/// The identifier of an expense, unique within its record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpenseId(String);

impl ExpenseId {
    /// Wrap an existing ID, e.g. one typed in by the user.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh ID from the current time in milliseconds and a random suffix.
    ///
    /// Uniqueness is overwhelmingly likely within a single record but is not checked.
    pub fn generate() -> Self {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let suffix = Uuid::new_v4().simple().to_string();

        Self(format!(
            "{}-{}",
            to_base36(millis.unsigned_abs()),
            &suffix[..8]
        ))
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ExpenseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn to_base36(mut value: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_owned();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();

    String::from_utf8_lossy(&digits).into_owned()
}

/// A single spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    /// The ID of the expense, assigned when it was added.
    pub id: ExpenseId,
    /// What the money was spent on.
    pub description: String,
    /// How much was spent.
    pub amount: f64,
    /// The classification of the expense.
    pub category: Category,
    /// The day the money was spent.
    #[serde(with = "iso_date")]
    pub date: Date,
    /// When the expense was added.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
    /// When the expense was last edited.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

impl Expense {
    fn validate(&self) -> Result<(), Error> {
        if self.id.as_str().trim().is_empty() {
            return Err(Error::InvalidRecord("an expense is missing its ID".to_owned()));
        }

        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(Error::InvalidRecord(format!(
                "expense {} has an invalid amount {}",
                self.id, self.amount
            )));
        }

        Ok(())
    }
}

/// The budget and every expense for one user or device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// The spending limit for the current period.
    #[serde(default, deserialize_with = "lenient_budget")]
    pub budget: f64,
    /// The expenses in insertion order.
    pub expenses: Vec<Expense>,
    /// The record format version.
    #[serde(default = "default_version")]
    pub version: String,
    /// When the record was first written.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            budget: 0.0,
            expenses: Vec::new(),
            version: default_version(),
            created_at: None,
        }
    }
}

fn default_version() -> String {
    RECORD_VERSION.to_owned()
}

/// Read any JSON value as a budget, treating anything that is not a finite,
/// non-negative number as zero.
fn lenient_budget<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;

    Ok(value
        .as_f64()
        .filter(|budget| budget.is_finite() && *budget >= 0.0)
        .unwrap_or(0.0))
}

impl Record {
    /// Parse and validate a record from JSON text.
    ///
    /// # Errors
    /// Returns [Error::InvalidRecord] if the text is not JSON, does not have the
    /// shape of a record, or contains an invalid expense.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let record: Record =
            serde_json::from_str(text).map_err(|error| Error::InvalidRecord(error.to_string()))?;
        record.validate()?;

        Ok(record)
    }

    /// Parse and validate a record from a JSON value, e.g. a remote document.
    ///
    /// # Errors
    /// Returns [Error::InvalidRecord] under the same conditions as [Record::from_json].
    pub fn from_value(value: Value) -> Result<Self, Error> {
        let record: Record = serde_json::from_value(value)
            .map_err(|error| Error::InvalidRecord(error.to_string()))?;
        record.validate()?;

        Ok(record)
    }

    /// Check the record invariants: a finite, non-negative budget and expenses
    /// with an ID and a finite, non-negative amount.
    ///
    /// # Errors
    /// Returns [Error::InvalidRecord] describing the first violation.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.budget.is_finite() || self.budget < 0.0 {
            return Err(Error::InvalidRecord(format!(
                "the budget {} is not a non-negative number",
                self.budget
            )));
        }

        self.expenses.iter().try_for_each(Expense::validate)
    }

    /// Serialize the record as compact JSON.
    ///
    /// # Errors
    /// Returns [Error::Serialization] if serialization fails.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|error| Error::Serialization(error.to_string()))
    }

    /// Serialize the record as indented JSON, the export format.
    ///
    /// # Errors
    /// Returns [Error::Serialization] if serialization fails.
    pub fn to_pretty_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self)
            .map_err(|error| Error::Serialization(error.to_string()))
    }

    /// The sum of every expense amount.
    pub fn total_spent(&self) -> f64 {
        self.expenses.iter().map(|expense| expense.amount).sum()
    }

    /// Whether the record holds neither a budget nor any expenses.
    pub fn is_empty(&self) -> bool {
        self.budget == 0.0 && self.expenses.is_empty()
    }

    /// Set the creation time if the record has never been written.
    pub(crate) fn stamp_created_at(&mut self) {
        self.created_at.get_or_insert_with(OffsetDateTime::now_utc);
    }
}

#[cfg(test)]
mod record_tests {
    use time::macros::{date, datetime};

    use crate::{
        Error,
        category::Category,
        record::{Expense, ExpenseId, RECORD_VERSION, Record, parse_date, to_base36},
    };

    fn sample_record() -> Record {
        Record {
            budget: 2500.0,
            expenses: vec![Expense {
                id: ExpenseId::new("abc-123"),
                description: "Weekly groceries".to_owned(),
                amount: 142.35,
                category: Category::Food,
                date: date!(2024 - 03 - 01),
                created_at: Some(datetime!(2024-03-01 10:15:00 UTC)),
                updated_at: None,
            }],
            version: RECORD_VERSION.to_owned(),
            created_at: Some(datetime!(2024-02-28 08:00:00 UTC)),
        }
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = sample_record().to_json().unwrap();

        assert!(json.contains("\"createdAt\":\"2024-02-28T08:00:00Z\""), "{json}");
        assert!(json.contains("\"date\":\"2024-03-01\""), "{json}");
        assert!(json.contains("\"category\":\"food\""), "{json}");
        assert!(!json.contains("updatedAt"), "{json}");
    }

    #[test]
    fn parses_exported_json() {
        let text = sample_record().to_pretty_json().unwrap();

        let record = Record::from_json(&text).unwrap();

        assert_eq!(record, sample_record());
    }

    #[test]
    fn missing_budget_is_zero() {
        let record = Record::from_json(r#"{"expenses": []}"#).unwrap();

        assert_eq!(record.budget, 0.0);
        assert_eq!(record.version, RECORD_VERSION);
    }

    #[test]
    fn non_numeric_budget_is_zero() {
        let record = Record::from_json(r#"{"budget": "lots", "expenses": []}"#).unwrap();

        assert_eq!(record.budget, 0.0);
    }

    #[test]
    fn negative_budget_is_zero_when_read() {
        let record = Record::from_json(r#"{"budget": -20, "expenses": []}"#).unwrap();

        assert_eq!(record.budget, 0.0);
    }

    #[test]
    fn ignores_remote_bookkeeping_fields() {
        let text = r#"{
            "budget": 10,
            "expenses": [],
            "userId": "u1",
            "lastModified": "2024-03-01T00:00:00Z"
        }"#;

        let record = Record::from_json(text).unwrap();

        assert_eq!(record.budget, 10.0);
    }

    #[test]
    fn rejects_expense_with_negative_amount() {
        let text = r#"{"budget": 10, "expenses": [{
            "id": "a", "description": "Bus", "amount": -3,
            "category": "transport", "date": "2024-01-01"
        }]}"#;

        let result = Record::from_json(text);

        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn rejects_expense_with_string_amount() {
        let text = r#"{"budget": 10, "expenses": [{
            "id": "a", "description": "Bus", "amount": "3",
            "category": "transport", "date": "2024-01-01"
        }]}"#;

        let result = Record::from_json(text);

        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn rejects_expense_missing_required_field() {
        let text = r#"{"budget": 10, "expenses": [{
            "id": "a", "amount": 3, "category": "transport", "date": "2024-01-01"
        }]}"#;

        let result = Record::from_json(text);

        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn rejects_missing_expense_list() {
        let result = Record::from_json(r#"{"budget": 10}"#);

        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn rejects_text_that_is_not_json() {
        let result = Record::from_json("definitely not json");

        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn validate_rejects_non_finite_budget() {
        let record = Record {
            budget: f64::INFINITY,
            ..Default::default()
        };

        assert!(matches!(record.validate(), Err(Error::InvalidRecord(_))));
    }

    #[test]
    fn total_spent_sums_amounts() {
        let mut record = sample_record();
        let mut second = record.expenses[0].clone();
        second.id = ExpenseId::new("def-456");
        second.amount = 7.65;
        record.expenses.push(second);

        assert_eq!(record.total_spent(), 150.0);
    }

    #[test]
    fn default_record_is_empty() {
        assert!(Record::default().is_empty());
        assert!(!sample_record().is_empty());
    }

    #[test]
    fn generated_ids_are_distinct() {
        let first = ExpenseId::generate();
        let second = ExpenseId::generate();

        assert_ne!(first, second);
        assert!(first.as_str().contains('-'));
    }

    #[test]
    fn base36_encodes_digits_and_letters() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn parse_date_accepts_iso_dates() {
        assert_eq!(parse_date("2024-02-29"), Ok(date!(2024 - 02 - 29)));
    }

    #[test]
    fn parse_date_rejects_other_formats() {
        assert_eq!(
            parse_date("01/03/2024"),
            Err(Error::InvalidDate("01/03/2024".to_owned()))
        );
    }
}
