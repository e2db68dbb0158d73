//! Exporting expenses as CSV for spreadsheets.

use serde::Serialize;

use crate::{Error, record::Expense};

#[derive(Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    date: String,
    description: &'a str,
    category: &'static str,
    amount: String,
}

impl<'a> From<&'a Expense> for CsvRow<'a> {
    fn from(expense: &'a Expense) -> Self {
        Self {
            id: expense.id.as_str(),
            date: expense.date.to_string(),
            description: &expense.description,
            category: expense.category.as_str(),
            amount: format!("{:.2}", expense.amount),
        }
    }
}

/// Write `expenses` as CSV with the header `id,date,description,category,amount`.
///
/// # Errors
/// Returns [Error::Serialization] if a row could not be written.
pub fn expenses_to_csv(expenses: &[Expense]) -> Result<String, Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    for expense in expenses {
        writer
            .serialize(CsvRow::from(expense))
            .map_err(|error| Error::Serialization(error.to_string()))?;
    }

    // The header is only written with the first row.
    if expenses.is_empty() {
        writer
            .write_record(["id", "date", "description", "category", "amount"])
            .map_err(|error| Error::Serialization(error.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|error| Error::Serialization(error.to_string()))?;

    String::from_utf8(bytes).map_err(|error| Error::Serialization(error.to_string()))
}

#[cfg(test)]
mod expenses_to_csv_tests {
    use crate::{category::Category, export::expenses_to_csv, test_utils::test_expense};

    #[test]
    fn writes_header_and_rows() {
        let expenses = vec![
            test_expense("a-1", 1200.0, Category::Food, "2024-03-01"),
            test_expense("b-2", 12.5, Category::Transport, "2024-03-05"),
        ];

        let csv = expenses_to_csv(&expenses).unwrap();

        assert_eq!(
            csv,
            "id,date,description,category,amount\n\
            a-1,2024-03-01,Expense a-1,food,1200.00\n\
            b-2,2024-03-05,Expense b-2,transport,12.50\n"
        );
    }

    #[test]
    fn quotes_descriptions_with_commas() {
        let mut expense = test_expense("a-1", 3.0, Category::Other, "2024-03-01");
        expense.description = "Milk, bread".to_owned();

        let csv = expenses_to_csv(&[expense]).unwrap();

        assert!(csv.contains("\"Milk, bread\""), "{csv}");
    }

    #[test]
    fn no_expenses_writes_only_the_header() {
        let csv = expenses_to_csv(&[]).unwrap();

        assert_eq!(csv, "id,date,description,category,amount\n");
    }
}
