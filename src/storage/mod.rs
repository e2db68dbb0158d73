//! Persistence of the [Record] behind one asynchronous contract.
//!
//! [LocalStore] keeps the record in a key-value table on the device and
//! [RemoteStore] keeps it in the signed-in user's cloud document. [Storage]
//! selects one of the two at runtime.

use async_trait::async_trait;

use crate::{Error, record::Record};

mod local;
mod remote;

pub use local::{LocalKeyValueStore, LocalStore, RECORD_KEY, SESSION_KEY};
pub use remote::{
    BUDGETS_COLLECTION, MigrationOutcome, MigrationSummary, RemoteStore, Subscription,
};

/// Which backend a store writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The key-value store on this device.
    Local,
    /// The signed-in user's cloud document.
    Remote,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => f.write_str("this device"),
            BackendKind::Remote => f.write_str("the cloud"),
        }
    }
}

/// Reads and writes the whole [Record].
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Which backend the store writes to.
    fn kind(&self) -> BackendKind;

    /// Read the current record.
    ///
    /// Returns the default record when nothing is stored or the stored record
    /// is corrupt.
    ///
    /// # Errors
    /// Returns an error if the backend could not be reached. Callers that are
    /// about to write should use this instead of [RecordStore::read] so a
    /// failed read does not overwrite the stored record with an empty one.
    async fn try_read(&self) -> Result<Record, Error>;

    /// Read the current record, falling back to the default record on any failure.
    async fn read(&self) -> Record {
        match self.try_read().await {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!("could not read the record from {}: {error}", self.kind());
                Record::default()
            }
        }
    }

    /// Validate and persist `record`, replacing the stored record.
    ///
    /// # Errors
    /// Returns [Error::InvalidRecord] if the record breaks an invariant, or an
    /// error from the backend. The stored record is unchanged on error.
    async fn write(&self, record: &Record) -> Result<(), Error>;

    /// Delete the stored record. Clearing an empty store succeeds.
    ///
    /// # Errors
    /// Returns an error from the backend.
    async fn clear(&self) -> Result<(), Error>;

    /// The current record as indented JSON.
    ///
    /// # Errors
    /// Returns [Error::Serialization] if the record could not be serialized.
    async fn export_as_text(&self) -> Result<String, Error> {
        self.read().await.to_pretty_json()
    }

    /// Parse, validate and store a record exported with [RecordStore::export_as_text].
    ///
    /// # Errors
    /// Returns [Error::InvalidRecord] if `text` is not a valid record, or an
    /// error from [RecordStore::write]. The stored record is unchanged on error.
    async fn import_from_text(&self, text: &str) -> Result<Record, Error> {
        let record = Record::from_json(text)?;
        self.write(&record).await?;

        tracing::info!(
            "imported {} expenses into {}",
            record.expenses.len(),
            self.kind()
        );

        Ok(record)
    }
}

/// The backend selected at startup or after signing in or out.
pub enum Storage {
    /// The key-value store on this device.
    Local(LocalStore),
    /// The signed-in user's cloud document.
    Remote(RemoteStore),
}

impl Storage {
    /// The remote store, if that is the selected backend.
    pub fn as_remote(&self) -> Option<&RemoteStore> {
        match self {
            Storage::Local(_) => None,
            Storage::Remote(remote) => Some(remote),
        }
    }
}

#[async_trait]
impl RecordStore for Storage {
    fn kind(&self) -> BackendKind {
        match self {
            Storage::Local(local) => local.kind(),
            Storage::Remote(remote) => remote.kind(),
        }
    }

    async fn try_read(&self) -> Result<Record, Error> {
        match self {
            Storage::Local(local) => local.try_read().await,
            Storage::Remote(remote) => remote.try_read().await,
        }
    }

    async fn write(&self, record: &Record) -> Result<(), Error> {
        match self {
            Storage::Local(local) => local.write(record).await,
            Storage::Remote(remote) => remote.write(record).await,
        }
    }

    async fn clear(&self) -> Result<(), Error> {
        match self {
            Storage::Local(local) => local.clear().await,
            Storage::Remote(remote) => remote.clear().await,
        }
    }
}
