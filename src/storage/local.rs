use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};

use crate::{
    Error,
    record::{MAX_RECORD_BYTES, Record},
    storage::{BackendKind, RecordStore},
};

/// The key the record is stored under.
pub const RECORD_KEY: &str = "budget-tracker-data";

/// The key the signed-in session is stored under.
pub const SESSION_KEY: &str = "budget-tracker-session";

/// A string key-value store on the device, one value per key.
#[derive(Debug, Clone)]
pub struct LocalKeyValueStore {
    db_connection: Arc<Mutex<Connection>>,
}

impl LocalKeyValueStore {
    /// Use `connection` as the store, creating the table if needed.
    ///
    /// # Errors
    /// Returns an error if the table could not be created.
    pub fn new(connection: Connection) -> Result<Self, Error> {
        connection.execute(
            "CREATE TABLE IF NOT EXISTS local_storage (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                    )",
            (),
        )?;

        Ok(Self {
            db_connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Open the store in the SQLite database at `path`, creating it if needed.
    ///
    /// # Errors
    /// Returns an error if the database could not be opened.
    pub fn open(path: &Path) -> Result<Self, Error> {
        Self::new(Connection::open(path)?)
    }

    /// A store that lives only as long as the process.
    ///
    /// # Errors
    /// Returns an error if the database could not be created.
    pub fn in_memory() -> Result<Self, Error> {
        Self::new(Connection::open_in_memory()?)
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>, Error> {
        self.db_connection.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Get the value stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the database could not be read.
    pub fn get_item(&self, key: &str) -> Result<Option<String>, Error> {
        self.connection()?
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                (key,),
                |row| row.get(0),
            )
            .optional()
            .map_err(Error::from)
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns an error if the database could not be written.
    pub fn set_item(&self, key: &str, value: &str) -> Result<(), Error> {
        self.connection()?.execute(
            "INSERT INTO local_storage (key, value) VALUES (?1, ?2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            (key, value),
        )?;

        Ok(())
    }

    /// Delete the value stored under `key`. Removing a missing key succeeds.
    ///
    /// # Errors
    /// Returns an error if the database could not be written.
    pub fn remove_item(&self, key: &str) -> Result<(), Error> {
        self.connection()?
            .execute("DELETE FROM local_storage WHERE key = ?1", (key,))?;

        Ok(())
    }
}

/// Keeps the record as JSON text under [RECORD_KEY] in a [LocalKeyValueStore].
#[derive(Debug, Clone)]
pub struct LocalStore {
    items: LocalKeyValueStore,
    max_record_bytes: usize,
}

impl LocalStore {
    /// Store the record in `items`, accepting records up to [MAX_RECORD_BYTES].
    pub fn new(items: LocalKeyValueStore) -> Self {
        Self::with_limit(items, MAX_RECORD_BYTES)
    }

    /// Store the record in `items`, accepting records up to `max_record_bytes`.
    pub fn with_limit(items: LocalKeyValueStore, max_record_bytes: usize) -> Self {
        Self {
            items,
            max_record_bytes,
        }
    }

    /// The key-value store the record lives in.
    pub fn items(&self) -> &LocalKeyValueStore {
        &self.items
    }
}

#[async_trait]
impl RecordStore for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn try_read(&self) -> Result<Record, Error> {
        let Some(text) = self.items.get_item(RECORD_KEY)? else {
            return Ok(Record::default());
        };

        match Record::from_json(&text) {
            Ok(record) => Ok(record),
            Err(error) => {
                tracing::warn!("ignoring the corrupt record on this device: {error}");
                Ok(Record::default())
            }
        }
    }

    async fn write(&self, record: &Record) -> Result<(), Error> {
        record.validate()?;

        let text = record.to_json()?;
        if text.len() > self.max_record_bytes {
            return Err(Error::RecordTooLarge {
                size: text.len(),
                limit: self.max_record_bytes,
            });
        }

        self.items.set_item(RECORD_KEY, &text)
    }

    async fn clear(&self) -> Result<(), Error> {
        self.items.remove_item(RECORD_KEY)
    }
}

#[cfg(test)]
mod local_store_tests {
    use time::macros::date;

    use crate::{
        Error,
        category::Category,
        record::{Expense, ExpenseId, Record},
        storage::{LocalKeyValueStore, LocalStore, RECORD_KEY, RecordStore},
    };

    fn get_test_store() -> LocalStore {
        LocalStore::new(LocalKeyValueStore::in_memory().unwrap())
    }

    fn sample_record() -> Record {
        Record {
            budget: 1000.0,
            expenses: vec![Expense {
                id: ExpenseId::new("a-1"),
                description: "Train ticket".to_owned(),
                amount: 12.5,
                category: Category::Transport,
                date: date!(2024 - 05 - 02),
                created_at: None,
                updated_at: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn key_value_round_trip() {
        let items = LocalKeyValueStore::in_memory().unwrap();

        items.set_item("greeting", "hello").unwrap();
        items.set_item("greeting", "kia ora").unwrap();

        assert_eq!(items.get_item("greeting"), Ok(Some("kia ora".to_owned())));
        assert_eq!(items.get_item("missing"), Ok(None));
    }

    #[test]
    fn remove_item_is_idempotent() {
        let items = LocalKeyValueStore::in_memory().unwrap();
        items.set_item("greeting", "hello").unwrap();

        items.remove_item("greeting").unwrap();
        items.remove_item("greeting").unwrap();

        assert_eq!(items.get_item("greeting"), Ok(None));
    }

    #[test]
    fn values_survive_reopening_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budget_tracker.db");

        LocalKeyValueStore::open(&path)
            .unwrap()
            .set_item("greeting", "hello")
            .unwrap();
        let reopened = LocalKeyValueStore::open(&path).unwrap();

        assert_eq!(reopened.get_item("greeting"), Ok(Some("hello".to_owned())));
    }

    #[tokio::test]
    async fn read_empty_store_returns_default() {
        let store = get_test_store();

        assert_eq!(store.read().await, Record::default());
    }

    #[tokio::test]
    async fn write_then_read_returns_record() {
        let store = get_test_store();

        store.write(&sample_record()).await.unwrap();

        assert_eq!(store.read().await, sample_record());
    }

    #[tokio::test]
    async fn invalid_write_keeps_previous_record() {
        let store = get_test_store();
        store.write(&sample_record()).await.unwrap();
        let mut invalid = sample_record();
        invalid.expenses[0].amount = f64::NAN;

        let result = store.write(&invalid).await;

        assert!(matches!(result, Err(Error::InvalidRecord(_))));
        assert_eq!(store.read().await, sample_record());
    }

    #[tokio::test]
    async fn negative_budget_is_rejected() {
        let store = get_test_store();
        let record = Record {
            budget: -1.0,
            ..Default::default()
        };

        let result = store.write(&record).await;

        assert!(matches!(result, Err(Error::InvalidRecord(_))));
    }

    #[tokio::test]
    async fn oversized_record_is_rejected() {
        let store = LocalStore::with_limit(LocalKeyValueStore::in_memory().unwrap(), 64);
        store.write(&Record::default()).await.unwrap();

        let result = store.write(&sample_record()).await;

        assert!(matches!(
            result,
            Err(Error::RecordTooLarge { limit: 64, .. })
        ));
        assert_eq!(store.read().await, Record::default());
    }

    #[tokio::test]
    async fn corrupt_record_reads_as_default() {
        let store = get_test_store();
        store
            .items()
            .set_item(RECORD_KEY, "{\"budget\": 10, \"expenses\": [{}]}")
            .unwrap();

        assert_eq!(store.try_read().await, Ok(Record::default()));
    }

    #[tokio::test]
    async fn clear_removes_record() {
        let store = get_test_store();
        store.write(&sample_record()).await.unwrap();

        store.clear().await.unwrap();
        store.clear().await.unwrap();

        assert_eq!(store.read().await, Record::default());
        assert_eq!(store.items().get_item(RECORD_KEY), Ok(None));
    }

    #[tokio::test]
    async fn export_then_import_into_fresh_store() {
        let store = get_test_store();
        store.write(&sample_record()).await.unwrap();
        let fresh = get_test_store();

        let text = store.export_as_text().await.unwrap();
        let imported = fresh.import_from_text(&text).await.unwrap();

        assert_eq!(imported, sample_record());
        assert_eq!(fresh.read().await, sample_record());
    }

    #[tokio::test]
    async fn failed_import_keeps_previous_record() {
        let store = get_test_store();
        store.write(&sample_record()).await.unwrap();

        let result = store.import_from_text("[1, 2, 3]").await;

        assert!(matches!(result, Err(Error::InvalidRecord(_))));
        assert_eq!(store.read().await, sample_record());
    }
}
