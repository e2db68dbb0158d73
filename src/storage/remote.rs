use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, Weak,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::{
    Error,
    cloud::{DocumentSnapshot, DocumentStore, UserId},
    record::Record,
    storage::{BackendKind, RecordStore},
};

/// The collection holding one budget document per user, keyed by user ID.
pub const BUDGETS_COLLECTION: &str = "budgets";

const CREATED_AT_FIELD: &str = "createdAt";

/// What a migration would copy, shown to the user before they confirm it.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationSummary {
    /// The number of expenses in the local record.
    pub expense_count: usize,
    /// The budget in the local record.
    pub budget: f64,
    /// Whether the cloud document already holds a budget or expenses that the
    /// migration would overwrite.
    pub remote_has_data: bool,
}

/// The result of [RemoteStore::migrate_once].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The local record was written to the cloud document.
    Migrated,
    /// The user declined, nothing was written.
    Declined,
    /// The local record was empty, nothing was written.
    NothingToMigrate,
}

struct ActiveListener {
    id: u64,
    task: JoinHandle<()>,
}

impl Drop for ActiveListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

type ListenerSlot = Mutex<Option<ActiveListener>>;

fn lock_slot(slot: &ListenerSlot) -> MutexGuard<'_, Option<ActiveListener>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps the record in the document `budgets/<user id>` of a [DocumentStore].
///
/// Dropping the store stops its subscription, if any.
pub struct RemoteStore {
    documents: Arc<dyn DocumentStore>,
    user_id: UserId,
    listener: Arc<ListenerSlot>,
    next_subscription: AtomicU64,
}

impl RemoteStore {
    /// Store the record of `user_id` in `documents`.
    pub fn new(documents: Arc<dyn DocumentStore>, user_id: UserId) -> Self {
        Self {
            documents,
            user_id,
            listener: Arc::new(Mutex::new(None)),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// The user whose record this store holds.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Call `callback` with the record now and after every change to the cloud
    /// document, including changes made through this store.
    ///
    /// A deleted document is delivered as the default record. Subscribing again
    /// cancels the previous subscription.
    ///
    /// # Errors
    /// Returns [Error::Cloud] if the platform refused to start listening.
    pub async fn subscribe<F>(&self, callback: F) -> Result<Subscription, Error>
    where
        F: Fn(Record) + Send + Sync + 'static,
    {
        self.unsubscribe();

        let mut listener = self
            .documents
            .listen(BUDGETS_COLLECTION, self.user_id.as_str())
            .await?;

        let user_id = self.user_id.clone();
        let task = tokio::spawn(async move {
            while let Some(update) = listener.next().await {
                match update {
                    Ok(snapshot) => callback(record_from_snapshot(snapshot, &user_id)),
                    Err(error) => {
                        tracing::warn!("error while listening to the budget of {user_id}: {error}")
                    }
                }
            }

            tracing::debug!("stopped listening to the budget of {user_id}");
        });

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        *lock_slot(&self.listener) = Some(ActiveListener { id, task });

        Ok(Subscription {
            id,
            slot: Arc::downgrade(&self.listener),
        })
    }

    /// Stop the current subscription, if any.
    pub fn unsubscribe(&self) {
        lock_slot(&self.listener).take();
    }

    /// Whether a subscription is running.
    pub fn is_subscribed(&self) -> bool {
        lock_slot(&self.listener).is_some()
    }

    /// Copy `local` into the cloud document once the user agrees.
    ///
    /// `confirm` sees what would be copied and whether the cloud document would
    /// be overwritten. Confirmed migrations always overwrite the cloud budget
    /// and expenses, so calling this twice copies the record twice.
    ///
    /// # Errors
    /// Returns [Error::InvalidRecord] if `local` is invalid, or [Error::Cloud]
    /// if the cloud document could not be read or written.
    pub async fn migrate_once<F>(&self, local: &Record, confirm: F) -> Result<MigrationOutcome, Error>
    where
        F: FnOnce(&MigrationSummary) -> bool,
    {
        if local.is_empty() {
            return Ok(MigrationOutcome::NothingToMigrate);
        }

        local.validate()?;
        let remote = self.try_read().await?;

        let summary = MigrationSummary {
            expense_count: local.expenses.len(),
            budget: local.budget,
            remote_has_data: !remote.is_empty(),
        };

        if !confirm(&summary) {
            tracing::info!("{} declined to migrate their local data", self.user_id);
            return Ok(MigrationOutcome::Declined);
        }

        self.write(local).await?;
        tracing::info!(
            "migrated {} expenses to the cloud for {}",
            summary.expense_count,
            self.user_id
        );

        Ok(MigrationOutcome::Migrated)
    }
}

#[async_trait]
impl RecordStore for RemoteStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn try_read(&self) -> Result<Record, Error> {
        let snapshot = self
            .documents
            .get(BUDGETS_COLLECTION, self.user_id.as_str())
            .await?;

        Ok(record_from_snapshot(snapshot, &self.user_id))
    }

    async fn write(&self, record: &Record) -> Result<(), Error> {
        record.validate()?;

        let Value::Object(mut fields) = serde_json::to_value(record)
            .map_err(|error| Error::Serialization(error.to_string()))?
        else {
            return Err(Error::Serialization(
                "the record did not serialize to a JSON object".to_owned(),
            ));
        };
        // The merge is shallow, an absent field would keep the document's old value.
        fields.entry(CREATED_AT_FIELD).or_insert(Value::Null);

        self.documents
            .merge(BUDGETS_COLLECTION, self.user_id.as_str(), fields)
            .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<(), Error> {
        self.documents
            .delete(BUDGETS_COLLECTION, self.user_id.as_str())
            .await?;

        Ok(())
    }
}

fn record_from_snapshot(snapshot: DocumentSnapshot, user_id: &UserId) -> Record {
    let Some(data) = snapshot.data else {
        return Record::default();
    };

    Record::from_value(Value::Object(data)).unwrap_or_else(|error| {
        tracing::warn!("ignoring the corrupt budget of {user_id}: {error}");
        Record::default()
    })
}

/// A handle to a running [RemoteStore::subscribe] listener.
///
/// Dropping the handle leaves the listener running, call [Subscription::cancel]
/// to stop it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    slot: Weak<ListenerSlot>,
}

impl Subscription {
    /// Stop the listener if it is still the store's current subscription.
    pub fn cancel(self) {
        let Some(slot) = self.slot.upgrade() else {
            return;
        };

        let mut listener = lock_slot(&slot);
        if listener.as_ref().is_some_and(|active| active.id == self.id) {
            listener.take();
        }
    }

    /// Whether this handle's listener is still running.
    pub fn is_active(&self) -> bool {
        self.slot.upgrade().is_some_and(|slot| {
            lock_slot(&slot)
                .as_ref()
                .is_some_and(|active| active.id == self.id)
        })
    }
}
