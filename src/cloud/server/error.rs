use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::cloud::{ProviderError, codes, wire::ErrorBody};

/// The errors the emulator reports to its clients.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ServerError {
    /// The email address is malformed.
    #[error("\"{0}\" is not a valid email address")]
    InvalidEmail(String),

    /// The request had no password.
    #[error("a password is required")]
    MissingPassword,

    /// The password is too easy to guess, holds the suggestions for a stronger one.
    #[error("password is too weak: {0}")]
    WeakPassword(String),

    /// The email address is already registered.
    #[error("the email address is already in use")]
    EmailAlreadyInUse,

    /// No account is registered to the email address.
    #[error("no account is registered to the email address")]
    UserNotFound,

    /// The password does not match the account.
    #[error("the password is incorrect")]
    WrongPassword,

    /// The account has no password, e.g. it signs in through a third party.
    #[error("the account cannot sign in with a password")]
    InvalidCredential,

    /// The account has been disabled.
    #[error("the account has been disabled")]
    UserDisabled,

    /// The request did not include a bearer token.
    #[error("the request is missing a bearer token")]
    Unauthenticated,

    /// The bearer token is unknown, revoked or expired.
    #[error("the session has expired, sign in again")]
    TokenExpired,

    /// The caller tried to access another user's document.
    #[error("the caller may not access {0}")]
    PermissionDenied(String),

    /// The document does not exist.
    #[error("the document does not exist")]
    DocumentNotFound,

    /// A stored document is not a JSON object.
    #[error("the stored document {0} is corrupt")]
    CorruptDocument(String),

    /// An unexpected error with the password hashing library.
    ///
    /// The error string is only logged, clients receive a generic error.
    #[error("hashing failed: {0}")]
    HashingError(String),

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,
}

impl From<rusqlite::Error> for ServerError {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.ends_with("account.email") =>
            {
                ServerError::EmailAlreadyInUse
            }
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                ServerError::SqlError(error)
            }
        }
    }
}

impl ServerError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::InvalidEmail(_) => (StatusCode::BAD_REQUEST, codes::INVALID_EMAIL),
            ServerError::MissingPassword => (StatusCode::BAD_REQUEST, codes::MISSING_PASSWORD),
            ServerError::WeakPassword(_) => (StatusCode::BAD_REQUEST, codes::WEAK_PASSWORD),
            ServerError::EmailAlreadyInUse => (StatusCode::CONFLICT, codes::EMAIL_ALREADY_IN_USE),
            ServerError::UserNotFound => (StatusCode::BAD_REQUEST, codes::USER_NOT_FOUND),
            ServerError::WrongPassword => (StatusCode::BAD_REQUEST, codes::WRONG_PASSWORD),
            ServerError::InvalidCredential => (StatusCode::BAD_REQUEST, codes::INVALID_CREDENTIAL),
            ServerError::UserDisabled => (StatusCode::FORBIDDEN, codes::USER_DISABLED),
            ServerError::Unauthenticated => (StatusCode::UNAUTHORIZED, codes::UNAUTHENTICATED),
            ServerError::TokenExpired => (StatusCode::UNAUTHORIZED, codes::ID_TOKEN_EXPIRED),
            ServerError::PermissionDenied(_) => (StatusCode::FORBIDDEN, codes::PERMISSION_DENIED),
            ServerError::DocumentNotFound => (StatusCode::NOT_FOUND, codes::NOT_FOUND),
            ServerError::CorruptDocument(_)
            | ServerError::HashingError(_)
            | ServerError::SqlError(_)
            | ServerError::DatabaseLockError => {
                (StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL)
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("An unexpected error occurred: {}", self);
            "An unexpected error occurred, check the server logs for more details.".to_owned()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: ProviderError::new(code, message),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod server_error_tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use crate::cloud::{codes, server::error::ServerError};

    #[test]
    fn expired_token_is_unauthorized() {
        let response = ServerError::TokenExpired.into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn internal_errors_hide_details() {
        let (status, code) = ServerError::HashingError("boom".to_owned()).status_and_code();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, codes::INTERNAL);
    }

    #[test]
    fn duplicate_email_maps_to_email_in_use() {
        let connection = rusqlite::Connection::open_in_memory().unwrap();
        connection
            .execute("CREATE TABLE account (email TEXT NOT NULL UNIQUE)", ())
            .unwrap();
        connection
            .execute("INSERT INTO account (email) VALUES ('a@example.com')", ())
            .unwrap();

        let error = connection
            .execute("INSERT INTO account (email) VALUES ('a@example.com')", ())
            .unwrap_err();

        assert_eq!(ServerError::from(error), ServerError::EmailAlreadyInUse);
    }
}
