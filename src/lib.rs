//! A personal budget and expense tracker.
//!
//! The budget for the current period and every expense are kept in a single
//! [Record](record::Record) that is persisted either to a local key-value store
//! on the device or to a per-user document in a cloud document store. Signing in
//! through the [AuthManager](auth::AuthManager) switches the [App](app::App) over
//! to the cloud backend.
//!
//! The crate also ships a small HTTP emulator of the cloud platform
//! ([cloud::server]) so the remote backend can be run end to end.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum_server::Handle;
use tokio::signal;

pub mod app;
pub mod auth;
pub mod budget;
pub mod category;
pub mod cloud;
pub mod config;
pub mod currency;
pub mod expense;
pub mod export;
pub mod logging;
pub mod record;
pub mod storage;

#[cfg(test)]
mod test_utils;

pub use app::{App, CloudServices};
pub use auth::{AuthFailure, AuthManager, AuthResult};
pub use budget::{BudgetManager, BudgetStatus, BudgetSummary};
pub use category::{Category, CategoryFilter};
pub use cloud::ProviderError;
pub use expense::{CategoryStatistics, ExpenseChanges, ExpenseManager, NewExpense};
pub use record::{Expense, ExpenseId, Record};
pub use storage::{BackendKind, RecordStore, Storage};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!("failed to install the terminate signal handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The record is not valid JSON, does not have the shape of a record, or
    /// breaks one of the record invariants.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The serialized record is larger than the local store accepts.
    #[error("the record is {size} bytes which exceeds the limit of {limit} bytes")]
    RecordTooLarge {
        /// The size of the serialized record in bytes.
        size: usize,
        /// The largest size the store accepts in bytes.
        limit: usize,
    },

    /// An expense amount that is not a positive, finite number.
    ///
    /// Holds the text or value that was rejected.
    #[error("\"{0}\" is not a valid amount, amounts must be numbers greater than zero")]
    InvalidAmount(String),

    /// An expense was given an empty or blank description.
    #[error("the description cannot be empty")]
    EmptyDescription,

    /// Text that does not name one of the expense categories.
    #[error("\"{0}\" is not a valid category")]
    InvalidCategory(String),

    /// Text that is not a date in the `YYYY-MM-DD` format.
    #[error("\"{0}\" is not a valid date, expected YYYY-MM-DD")]
    InvalidDate(String),

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    Storage(rusqlite::Error),

    /// An error occurred while serializing a struct as JSON or CSV.
    #[error("could not serialize: {0}")]
    Serialization(String),

    /// The cloud platform rejected a request or could not be reached.
    #[error("the cloud request failed: {0}")]
    Cloud(cloud::ProviderError),

    /// The operation needs the cloud backend but no user is signed in.
    #[error("you must be signed in to the cloud to do this")]
    NotSignedIn,

    /// The configuration could not be resolved, e.g. there is no home directory.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    LockPoisoned,
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        tracing::error!("an unhandled SQL error occurred: {}", value);
        Error::Storage(value)
    }
}

impl From<cloud::ProviderError> for Error {
    fn from(value: cloud::ProviderError) -> Self {
        Error::Cloud(value)
    }
}
