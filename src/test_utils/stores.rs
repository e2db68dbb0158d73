use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    Error,
    category::Category,
    record::{Expense, ExpenseId, Record, parse_date},
    storage::{BackendKind, LocalKeyValueStore, LocalStore, RecordStore},
};

pub(crate) fn local_store() -> Arc<LocalStore> {
    let items =
        LocalKeyValueStore::in_memory().expect("Could not initialise in-memory SQLite database");

    Arc::new(LocalStore::new(items))
}

#[track_caller]
pub(crate) fn test_expense(id: &str, amount: f64, category: Category, date: &str) -> Expense {
    Expense {
        id: ExpenseId::new(id),
        description: format!("Expense {id}"),
        amount,
        category,
        date: parse_date(date).expect("invalid test date"),
        created_at: None,
        updated_at: None,
    }
}

/// A store that reads as empty and fails every write.
pub(crate) struct FailingStore;

impl FailingStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl RecordStore for FailingStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn try_read(&self) -> Result<Record, Error> {
        Ok(Record::default())
    }

    async fn write(&self, _record: &Record) -> Result<(), Error> {
        Err(Error::Storage(rusqlite::Error::InvalidQuery))
    }

    async fn clear(&self) -> Result<(), Error> {
        Err(Error::Storage(rusqlite::Error::InvalidQuery))
    }
}
