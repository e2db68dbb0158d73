//! Account registration, sign-in, sign-out and password reset requests.

use axum::{Json, extract::State, http::StatusCode};
use rusqlite::{Connection, OptionalExtension};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cloud::{
    Session, SignInMethod, User, UserId, is_valid_email,
    server::{
        ServerState,
        error::ServerError,
        password::{PasswordHash, ValidatedPassword},
        token::{Caller, issue_token, revoke_token, token_digest},
    },
    wire::{CredentialsRequest, FederatedRequest, PasswordResetRequest},
};

/// An account as stored by the emulator.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// The public part of the account.
    pub user: User,
    /// The password hash, `None` for accounts that sign in through a third party.
    pub password_hash: Option<PasswordHash>,
    /// Whether the account is blocked from signing in.
    pub disabled: bool,
}

/// Create the account and password reset tables.
///
/// # Errors
///
/// This function will return an error if the SQL query failed.
pub fn create_account_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS account (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT,
                provider TEXT NOT NULL,
                disabled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
                )",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS password_reset (
                id INTEGER PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES account(id) ON DELETE CASCADE,
                code_digest TEXT NOT NULL,
                requested_at TEXT NOT NULL
                )",
        (),
    )?;

    Ok(())
}

fn parse_sign_in_method(text: &str) -> SignInMethod {
    match text {
        "google" => SignInMethod::Google,
        "github" => SignInMethod::GitHub,
        _ => SignInMethod::Password,
    }
}

/// Insert a new account.
///
/// # Errors
///
/// Returns [ServerError::EmailAlreadyInUse] if the email is already registered.
pub fn create_account(
    email: &str,
    password_hash: Option<PasswordHash>,
    provider: SignInMethod,
    connection: &Connection,
) -> Result<Account, ServerError> {
    let id = UserId::new(Uuid::new_v4().simple().to_string());

    connection.execute(
        "INSERT INTO account (id, email, password_hash, provider, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)",
        (
            id.as_str(),
            email,
            password_hash.as_ref().map(PasswordHash::as_str),
            provider.as_str(),
            OffsetDateTime::now_utc(),
        ),
    )?;

    Ok(Account {
        user: User {
            id,
            email: email.to_owned(),
            provider,
        },
        password_hash,
        disabled: false,
    })
}

/// Get the account registered to `email`, if any.
///
/// # Errors
///
/// Returns a [ServerError::SqlError] if an SQL related error occurred.
pub fn get_account_by_email(
    email: &str,
    connection: &Connection,
) -> Result<Option<Account>, ServerError> {
    connection
        .query_row(
            "SELECT id, email, password_hash, provider, disabled FROM account WHERE email = ?1",
            (email,),
            |row| {
                let provider: String = row.get(3)?;
                let password_hash: Option<String> = row.get(2)?;

                Ok(Account {
                    user: User {
                        id: UserId::new(row.get::<_, String>(0)?),
                        email: row.get(1)?,
                        provider: parse_sign_in_method(&provider),
                    },
                    password_hash: password_hash.map(PasswordHash::new_unchecked),
                    disabled: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(ServerError::from)
}

/// Block or unblock an account from signing in.
///
/// # Errors
///
/// Returns a [ServerError::SqlError] if an SQL related error occurred.
pub fn set_account_disabled(
    email: &str,
    disabled: bool,
    connection: &Connection,
) -> Result<(), ServerError> {
    connection.execute(
        "UPDATE account SET disabled = ?1 WHERE email = ?2",
        (disabled, email),
    )?;

    Ok(())
}

fn normalize_email(email: &str) -> Result<String, ServerError> {
    let email = email.trim().to_lowercase();

    if is_valid_email(&email) {
        Ok(email)
    } else {
        Err(ServerError::InvalidEmail(email))
    }
}

fn open_session(
    state: &ServerState,
    user: User,
    connection: &Connection,
) -> Result<Json<Session>, ServerError> {
    let token = issue_token(&user.id, state.config.token_lifetime, connection)?;
    tracing::info!("{} signed in with {}", user.id, user.provider.as_str());

    Ok(Json(Session { user, token }))
}

/// Register a new account with an email and password and sign in as it.
///
/// # Errors
///
/// Rejects malformed emails, missing or weak passwords and emails that are
/// already registered.
pub async fn sign_up(
    State(state): State<ServerState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<Session>, ServerError> {
    let email = normalize_email(&request.email)?;
    let password = ValidatedPassword::new(&request.password, &email)?;
    let password_hash = PasswordHash::new(password, state.config.password_hash_cost)?;

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| ServerError::DatabaseLockError)?;
    let account = create_account(
        &email,
        Some(password_hash),
        SignInMethod::Password,
        &connection,
    )?;

    open_session(&state, account.user, &connection)
}

/// Sign in with an email and password.
///
/// # Errors
///
/// Rejects unknown emails, wrong passwords, disabled accounts and accounts
/// without a password.
pub async fn sign_in(
    State(state): State<ServerState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<Session>, ServerError> {
    let email = normalize_email(&request.email)?;

    if request.password.is_empty() {
        return Err(ServerError::MissingPassword);
    }

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| ServerError::DatabaseLockError)?;
    let account = get_account_by_email(&email, &connection)?.ok_or(ServerError::UserNotFound)?;

    if account.disabled {
        return Err(ServerError::UserDisabled);
    }

    let password_hash = account
        .password_hash
        .as_ref()
        .ok_or(ServerError::InvalidCredential)?;

    let is_password_correct = password_hash.verify(&request.password).map_err(|error| {
        tracing::error!("Error verifying password: {error}");
        ServerError::HashingError(error.to_string())
    })?;

    if !is_password_correct {
        return Err(ServerError::WrongPassword);
    }

    open_session(&state, account.user, &connection)
}

/// Sign in with an identity asserted by a third-party provider, creating the
/// account on first use.
///
/// # Errors
///
/// Rejects malformed emails and disabled accounts.
pub async fn federated_sign_in(
    State(state): State<ServerState>,
    Json(request): Json<FederatedRequest>,
) -> Result<Json<Session>, ServerError> {
    let email = normalize_email(&request.email)?;

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| ServerError::DatabaseLockError)?;
    let account = match get_account_by_email(&email, &connection)? {
        Some(account) => account,
        None => create_account(&email, None, request.provider.into(), &connection)?,
    };

    if account.disabled {
        return Err(ServerError::UserDisabled);
    }

    open_session(&state, account.user, &connection)
}

/// Revoke the token the request was made with.
pub async fn sign_out(
    State(state): State<ServerState>,
    caller: Caller,
) -> Result<StatusCode, ServerError> {
    let connection = state
        .db_connection
        .lock()
        .map_err(|_| ServerError::DatabaseLockError)?;
    revoke_token(&caller.token_digest, &connection)?;
    tracing::info!("{} signed out", caller.user_id);

    Ok(StatusCode::NO_CONTENT)
}

/// Record a password reset code for the account registered to the email.
///
/// The emulator does not send email, the code is written to the log instead.
///
/// # Errors
///
/// Rejects malformed and unregistered emails.
pub async fn request_password_reset(
    State(state): State<ServerState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<StatusCode, ServerError> {
    let email = normalize_email(&request.email)?;

    let connection = state
        .db_connection
        .lock()
        .map_err(|_| ServerError::DatabaseLockError)?;
    let account = get_account_by_email(&email, &connection)?.ok_or(ServerError::UserNotFound)?;

    let code = Uuid::new_v4().simple().to_string();
    connection.execute(
        "INSERT INTO password_reset (account_id, code_digest, requested_at) VALUES (?1, ?2, ?3)",
        (
            account.user.id.as_str(),
            token_digest(&code),
            OffsetDateTime::now_utc(),
        ),
    )?;
    tracing::info!("Password reset code for {email}: {code}");

    Ok(StatusCode::NO_CONTENT)
}
