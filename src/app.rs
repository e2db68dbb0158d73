//! Wires the stores, managers and account together and switches backends when
//! a user signs in or out.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    Error,
    auth::AuthManager,
    budget::BudgetManager,
    cloud::{DocumentStore, User, UserId},
    expense::ExpenseManager,
    record::Record,
    storage::{
        BackendKind, LocalStore, MigrationOutcome, MigrationSummary, RecordStore, RemoteStore,
        Storage, Subscription,
    },
};

/// The cloud platform the app can sign in to.
#[derive(Clone)]
pub struct CloudServices {
    /// Signs users in and out.
    pub auth: AuthManager,
    /// Holds the signed-in user's record.
    pub documents: Arc<dyn DocumentStore>,
}

/// The application: the active backend and the managers built on it.
///
/// The record lives on this device until a user signs in, then in that user's
/// cloud document. Call [App::sync_auth_state] after signing in or out to
/// switch backends.
pub struct App {
    local: LocalStore,
    cloud: Option<CloudServices>,
    auth_state: Option<watch::Receiver<Option<User>>>,
    active_user: Option<UserId>,
    storage: Arc<Storage>,
    budget: BudgetManager,
    expenses: ExpenseManager,
}

impl App {
    /// Create the app, using the cloud document if a user is already signed in.
    pub fn new(local: LocalStore, cloud: Option<CloudServices>) -> Self {
        let auth_state = cloud.as_ref().map(|cloud| cloud.auth.auth_state());
        let storage = Arc::new(Storage::Local(local.clone()));

        let mut app = Self {
            budget: BudgetManager::new(storage.clone()),
            expenses: ExpenseManager::new(storage.clone()),
            local,
            cloud,
            auth_state,
            active_user: None,
            storage,
        };
        app.sync_auth_state();

        app
    }

    /// Switch to the backend of the signed-in user, if that has changed.
    ///
    /// Switching stops any subscription to the previous backend.
    pub fn sync_auth_state(&mut self) -> BackendKind {
        let user_id = self
            .auth_state
            .as_mut()
            .and_then(|state| state.borrow_and_update().as_ref().map(|user| user.id.clone()));

        if user_id == self.active_user {
            return self.storage.kind();
        }

        if let Some(remote) = self.storage.as_remote() {
            remote.unsubscribe();
        }

        let storage = match (&user_id, &self.cloud) {
            (Some(user_id), Some(cloud)) => {
                Storage::Remote(RemoteStore::new(cloud.documents.clone(), user_id.clone()))
            }
            _ => Storage::Local(self.local.clone()),
        };

        self.use_storage(storage);
        self.active_user = user_id;

        tracing::info!("storing data in {}", self.storage.kind());

        self.storage.kind()
    }

    /// Wait until a user signs in or out, then switch backends.
    ///
    /// Returns `None` without waiting when there is no cloud platform.
    pub async fn wait_for_auth_change(&mut self) -> Option<BackendKind> {
        let state = self.auth_state.as_mut()?;
        state.changed().await.ok()?;

        Some(self.sync_auth_state())
    }

    fn use_storage(&mut self, storage: Storage) {
        self.storage = Arc::new(storage);
        self.budget = BudgetManager::new(self.storage.clone());
        self.expenses = ExpenseManager::new(self.storage.clone());
    }

    /// The active backend.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Which backend is active.
    pub fn backend(&self) -> BackendKind {
        self.storage.kind()
    }

    /// The record on this device, regardless of the active backend.
    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// The budget of the active backend.
    pub fn budget(&self) -> &BudgetManager {
        &self.budget
    }

    /// The expenses of the active backend.
    pub fn expenses(&self) -> &ExpenseManager {
        &self.expenses
    }

    /// The account manager, `None` without a cloud platform.
    pub fn auth(&self) -> Option<&AuthManager> {
        self.cloud.as_ref().map(|cloud| &cloud.auth)
    }

    /// The record on this device, if a user is signed in and it holds a budget
    /// or expenses that could be copied to the cloud.
    pub async fn pending_migration(&self) -> Option<Record> {
        self.storage.as_remote()?;

        let record = self.local.read().await;
        (!record.is_empty()).then_some(record)
    }

    /// Copy the record on this device to the signed-in user's cloud document
    /// if `confirm` agrees.
    ///
    /// # Errors
    /// Returns [Error::NotSignedIn] if no user is signed in, or an error if
    /// either record could not be read or the cloud document written.
    pub async fn migrate_local_data<F>(&self, confirm: F) -> Result<MigrationOutcome, Error>
    where
        F: FnOnce(&MigrationSummary) -> bool,
    {
        let remote = self.storage.as_remote().ok_or(Error::NotSignedIn)?;
        let local = self.local.try_read().await?;

        remote.migrate_once(&local, confirm).await
    }

    /// Call `callback` with the record whenever the signed-in user's cloud
    /// document changes.
    ///
    /// # Errors
    /// Returns [Error::NotSignedIn] if the record is on this device, or
    /// [Error::Cloud] if the platform refused to start listening.
    pub async fn watch<F>(&self, callback: F) -> Result<Subscription, Error>
    where
        F: Fn(Record) + Send + Sync + 'static,
    {
        let remote = self.storage.as_remote().ok_or(Error::NotSignedIn)?;

        remote.subscribe(callback).await
    }
}
