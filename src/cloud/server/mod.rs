//! An HTTP emulator of the cloud platform.
//!
//! Serves the identity and document endpoints in [endpoints](crate::cloud::endpoints)
//! from a SQLite database so the remote backend can be run without a third-party
//! service.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Router,
    extract::{MatchedPath, Request},
    middleware,
    routing::{get, post},
};
use rusqlite::Connection;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::{Error, cloud::endpoints, logging::logging_middleware};

pub mod account;
pub mod document;
mod error;
mod password;
pub mod token;

pub use document::DocumentChange;
pub use error::ServerError;
pub use password::{PasswordHash, ValidatedPassword};

/// How long a listen request waits for a change unless configured otherwise.
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(25);

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Settings for the emulator.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long session tokens stay valid.
    pub token_lifetime: time::Duration,
    /// How long a listen request waits for a change before responding with
    /// `204 No Content`.
    pub listen_timeout: Duration,
    /// The bcrypt cost for hashing passwords.
    pub password_hash_cost: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            token_lifetime: token::DEFAULT_TOKEN_LIFETIME,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
            password_hash_cost: PasswordHash::DEFAULT_COST,
        }
    }
}

/// The state of the emulator.
#[derive(Debug, Clone)]
pub struct ServerState {
    /// The database connection.
    pub db_connection: Arc<Mutex<Connection>>,
    /// Sends every new document revision to waiting listeners.
    pub changes: broadcast::Sender<DocumentChange>,
    /// The emulator settings.
    pub config: Arc<ServerConfig>,
}

impl ServerState {
    /// Create the emulator state, creating the tables if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(db_connection: Connection, config: ServerConfig) -> Result<Self, Error> {
        initialize(&db_connection)?;

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            db_connection: Arc::new(Mutex::new(db_connection)),
            changes,
            config: Arc::new(config),
        })
    }
}

/// Create the emulator tables.
///
/// # Errors
/// Returns an error if a table could not be created.
pub fn initialize(connection: &Connection) -> Result<(), rusqlite::Error> {
    account::create_account_table(connection)?;
    token::create_token_table(connection)?;
    document::create_document_table(connection)?;

    Ok(())
}

/// Return a router with all the emulator routes.
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route(endpoints::SIGN_UP, post(account::sign_up))
        .route(endpoints::SIGN_IN, post(account::sign_in))
        .route(endpoints::FEDERATED_SIGN_IN, post(account::federated_sign_in))
        .route(endpoints::SIGN_OUT, post(account::sign_out))
        .route(endpoints::PASSWORD_RESET, post(account::request_password_reset))
        .route(
            endpoints::DOCUMENT,
            get(document::get)
                .patch(document::merge)
                .delete(document::delete),
        )
        .route(endpoints::DOCUMENT_LISTEN, get(document::listen))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

/// Wrap `router` with a layer that opens a span for every request.
pub fn add_tracing_layer(router: Router) -> Router {
    let tracing_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request| {
            let method = req.method();
            let uri = req.uri();

            let matched_path = req
                .extensions()
                .get::<MatchedPath>()
                .map(|matched_path| matched_path.as_str());

            tracing::debug_span!("request", %method, %uri, matched_path)
        })
        // `ServerError` logs its own failures.
        .on_failure(());

    router.layer(tracing_layer)
}
