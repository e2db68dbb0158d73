//! Session tokens: issuing, revoking and authenticating requests with them.
//!
//! Only the SHA-256 digest of a token is stored, so a leaked database cannot be
//! used to impersonate users.

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::cloud::{
    UserId,
    server::{ServerState, error::ServerError},
};

/// How long a token stays valid unless configured otherwise.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::days(7);

/// Create the session token table.
///
/// # Errors
///
/// This function will return an error if the SQL query failed.
pub fn create_token_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS session_token (
                digest TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES account(id) ON DELETE CASCADE,
                expires_at TEXT NOT NULL
                )",
        (),
    )?;

    Ok(())
}

/// The hex-encoded SHA-256 digest of `token`.
pub fn token_digest(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Create a new token for `account_id` that expires after `lifetime`.
///
/// # Errors
///
/// Returns a [ServerError::SqlError] if the token could not be stored.
pub fn issue_token(
    account_id: &UserId,
    lifetime: Duration,
    connection: &Connection,
) -> Result<String, ServerError> {
    let token = format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );
    let expires_at = OffsetDateTime::now_utc() + lifetime;

    connection.execute(
        "INSERT INTO session_token (digest, account_id, expires_at) VALUES (?1, ?2, ?3)",
        (token_digest(&token), account_id.as_str(), expires_at),
    )?;

    Ok(token)
}

/// Delete the token with the given digest. Revoking an unknown token succeeds.
///
/// # Errors
///
/// Returns a [ServerError::SqlError] if an SQL related error occurred.
pub fn revoke_token(digest: &str, connection: &Connection) -> Result<(), ServerError> {
    connection.execute("DELETE FROM session_token WHERE digest = ?1", (digest,))?;

    Ok(())
}

/// Find the account a token belongs to.
///
/// Expired tokens are deleted when they are found.
///
/// # Errors
///
/// Returns [ServerError::TokenExpired] if the token is unknown, revoked or expired.
pub fn account_for_token(
    digest: &str,
    now: OffsetDateTime,
    connection: &Connection,
) -> Result<UserId, ServerError> {
    let row: Option<(String, OffsetDateTime)> = connection
        .query_row(
            "SELECT account_id, expires_at FROM session_token WHERE digest = ?1",
            (digest,),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match row {
        Some((account_id, expires_at)) if expires_at > now => Ok(UserId::new(account_id)),
        Some(_) => {
            revoke_token(digest, connection)?;
            Err(ServerError::TokenExpired)
        }
        None => Err(ServerError::TokenExpired),
    }
}

/// The authenticated caller of a request.
///
/// Extracting a `Caller` rejects requests without a valid bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    /// The account the token belongs to.
    pub user_id: UserId,
    /// The digest of the token the request carried.
    pub token_digest: String,
}

impl Caller {
    /// Check the caller owns the document `id`.
    ///
    /// # Errors
    ///
    /// Returns [ServerError::PermissionDenied] for another user's document.
    pub fn ensure_owner(&self, id: &str) -> Result<(), ServerError> {
        if self.user_id.as_str() == id {
            Ok(())
        } else {
            tracing::warn!("{} tried to access the document {id}", self.user_id);
            Err(ServerError::PermissionDenied(id.to_owned()))
        }
    }
}

impl FromRequestParts<ServerState> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ServerError::Unauthenticated)?;

        let token_digest = token_digest(bearer.token());
        let connection = state
            .db_connection
            .lock()
            .map_err(|_| ServerError::DatabaseLockError)?;
        let user_id = account_for_token(&token_digest, OffsetDateTime::now_utc(), &connection)?;

        Ok(Self {
            user_id,
            token_digest,
        })
    }
}
