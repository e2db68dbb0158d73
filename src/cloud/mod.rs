//! The seam between the tracker and the cloud platform: identity and per-user documents.
//!
//! [CloudClient] talks to the platform over HTTP and [server] is an HTTP emulator
//! of the platform.

use std::fmt::Display;

use async_trait::async_trait;
use email_address::{EmailAddress, Options};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::{sync::mpsc, task::JoinHandle};

mod client;
pub mod endpoints;
pub mod server;
mod wire;

pub use client::CloudClient;

/// The error codes the platform reports.
pub mod codes {
    /// The email address is already registered.
    pub const EMAIL_ALREADY_IN_USE: &str = "auth/email-already-in-use";
    /// The email address is malformed.
    pub const INVALID_EMAIL: &str = "auth/invalid-email";
    /// The password is too easy to guess.
    pub const WEAK_PASSWORD: &str = "auth/weak-password";
    /// No account exists for the email address.
    pub const USER_NOT_FOUND: &str = "auth/user-not-found";
    /// The password does not match the account.
    pub const WRONG_PASSWORD: &str = "auth/wrong-password";
    /// The email and password combination is not valid.
    pub const INVALID_CREDENTIAL: &str = "auth/invalid-credential";
    /// The platform is throttling requests.
    pub const TOO_MANY_REQUESTS: &str = "auth/too-many-requests";
    /// The platform could not be reached.
    pub const NETWORK_REQUEST_FAILED: &str = "auth/network-request-failed";
    /// The account has been disabled.
    pub const USER_DISABLED: &str = "auth/user-disabled";
    /// The sign-in method is not enabled.
    pub const OPERATION_NOT_ALLOWED: &str = "auth/operation-not-allowed";
    /// The user abandoned a federated sign-in.
    pub const POPUP_CLOSED_BY_USER: &str = "auth/popup-closed-by-user";
    /// No password was given.
    pub const MISSING_PASSWORD: &str = "auth/missing-password";
    /// The session token has expired or been revoked.
    pub const ID_TOKEN_EXPIRED: &str = "auth/id-token-expired";
    /// The request did not carry a session token.
    pub const UNAUTHENTICATED: &str = "unauthenticated";
    /// The caller may not access the document.
    pub const PERMISSION_DENIED: &str = "permission-denied";
    /// The document does not exist.
    pub const NOT_FOUND: &str = "not-found";
    /// The request body was malformed.
    pub const INVALID_ARGUMENT: &str = "invalid-argument";
    /// The platform failed unexpectedly.
    pub const INTERNAL: &str = "internal";
}

/// The ID of a cloud account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an account ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How an account signs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignInMethod {
    /// Email and password.
    Password,
    /// A Google identity.
    Google,
    /// A GitHub identity.
    GitHub,
}

impl SignInMethod {
    /// The wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignInMethod::Password => "password",
            SignInMethod::Google => "google",
            SignInMethod::GitHub => "github",
        }
    }
}

/// A third-party identity provider that can vouch for an email address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FederatedProvider {
    /// Sign in with Google.
    Google,
    /// Sign in with GitHub.
    GitHub,
}

impl From<FederatedProvider> for SignInMethod {
    fn from(provider: FederatedProvider) -> Self {
        match provider {
            FederatedProvider::Google => SignInMethod::Google,
            FederatedProvider::GitHub => SignInMethod::GitHub,
        }
    }
}

impl std::str::FromStr for FederatedProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "google" => Ok(FederatedProvider::Google),
            "github" => Ok(FederatedProvider::GitHub),
            other => Err(format!("unknown identity provider \"{other}\"")),
        }
    }
}

/// The outcome of the provider's consent flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FederatedCredential {
    /// The provider asserts the user owns `email`.
    Assertion {
        /// The asserted email address.
        email: String,
    },
    /// The user closed the consent flow before finishing it.
    Cancelled,
}

/// A signed-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// The account ID, also the ID of the account's budget document.
    pub id: UserId,
    /// The account email address.
    pub email: String,
    /// How the account signs in.
    pub provider: SignInMethod,
}

/// A signed-in account and the token that authorizes its requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// The signed-in account.
    pub user: User,
    /// The bearer token for platform requests.
    pub token: String,
}

/// An error reported by the cloud platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct ProviderError {
    /// The platform error code, e.g. `auth/wrong-password`.
    pub code: String,
    /// Diagnostic text, not meant for end users.
    pub message: String,
}

impl ProviderError {
    /// Create an error with `code` and diagnostic `message`.
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_owned(),
            message: message.into(),
        }
    }

    /// The platform could not be reached.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(codes::NETWORK_REQUEST_FAILED, message)
    }
}

/// The state of a document at some revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSnapshot {
    /// The document fields, `None` if the document does not exist.
    pub data: Option<Map<String, Value>>,
    /// When the document was last written or deleted.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
    /// Increases on every write or delete of the document.
    pub revision: u64,
}

impl DocumentSnapshot {
    /// The snapshot of a document that has never been written.
    pub fn missing() -> Self {
        Self {
            data: None,
            last_modified: None,
            revision: 0,
        }
    }

    /// Whether the document exists.
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }
}

/// A stream of snapshots of one document.
///
/// The first item is the current state of the document. Dropping the listener
/// stops it.
pub struct DocumentListener {
    receiver: mpsc::Receiver<Result<DocumentSnapshot, ProviderError>>,
    task: JoinHandle<()>,
}

impl DocumentListener {
    pub(crate) fn new(
        receiver: mpsc::Receiver<Result<DocumentSnapshot, ProviderError>>,
        task: JoinHandle<()>,
    ) -> Self {
        Self { receiver, task }
    }

    /// Wait for the next snapshot, `None` once the listener has stopped.
    pub async fn next(&mut self) -> Option<Result<DocumentSnapshot, ProviderError>> {
        self.receiver.recv().await
    }
}

impl Drop for DocumentListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Account management on the cloud platform.
///
/// The provider remembers the current session and uses its token for document
/// requests.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register a new account and sign in as it.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, ProviderError>;

    /// Sign in with an email and password.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError>;

    /// Sign in with a third-party identity, creating the account on first use.
    async fn sign_in_with_provider(
        &self,
        provider: FederatedProvider,
        credential: FederatedCredential,
    ) -> Result<Session, ProviderError>;

    /// Revoke the current session.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Ask the platform to send a password reset message to `email`.
    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError>;

    /// Resume a session saved by an earlier run.
    fn restore_session(&self, session: Session);

    /// The current session, if signed in.
    fn current_session(&self) -> Option<Session>;
}

/// Per-user JSON documents grouped into collections.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, [DocumentSnapshot::missing] if it does not exist.
    async fn get(&self, collection: &str, id: &str) -> Result<DocumentSnapshot, ProviderError>;

    /// Shallow-merge `fields` into a document, creating it if needed.
    ///
    /// The platform also sets `lastModified` and `userId` on the document.
    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), ProviderError>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), ProviderError>;

    /// Listen for changes to a document.
    async fn listen(&self, collection: &str, id: &str) -> Result<DocumentListener, ProviderError>;
}

/// Merge `fields` into `existing` and stamp the platform bookkeeping fields.
pub(crate) fn merge_fields(
    existing: Option<Map<String, Value>>,
    fields: Map<String, Value>,
    user_id: &UserId,
    now: OffsetDateTime,
) -> Map<String, Value> {
    let mut data = existing.unwrap_or_default();
    data.extend(fields);
    data.insert("userId".to_owned(), Value::String(user_id.to_string()));

    if let Ok(timestamp) = now.format(&time::format_description::well_known::Rfc3339) {
        data.insert("lastModified".to_owned(), Value::String(timestamp));
    }

    data
}

/// Whether `email` is a bare email address with a top-level domain.
///
/// Display names (`Alice <alice@example.com>`) and IP literal domains are rejected.
pub(crate) fn is_valid_email(email: &str) -> bool {
    let options = Options::default()
        .with_required_tld()
        .without_domain_literal()
        .without_display_text();

    EmailAddress::parse_with_options(email, options).is_ok()
}

#[cfg(test)]
mod cloud_tests {
    use serde_json::{Map, Value, json};
    use time::macros::datetime;

    use crate::cloud::{UserId, is_valid_email, merge_fields};

    #[test]
    fn merge_replaces_top_level_fields_only() {
        let existing = json!({"budget": 10, "expenses": [1, 2], "note": "keep"});
        let fields = json!({"budget": 20, "expenses": []});

        let merged = merge_fields(
            existing.as_object().cloned(),
            fields.as_object().cloned().unwrap(),
            &UserId::new("u1"),
            datetime!(2024-03-01 12:00:00 UTC),
        );

        assert_eq!(merged["budget"], json!(20));
        assert_eq!(merged["expenses"], json!([]));
        assert_eq!(merged["note"], json!("keep"));
        assert_eq!(merged["userId"], json!("u1"));
        assert_eq!(merged["lastModified"], json!("2024-03-01T12:00:00Z"));
    }

    #[test]
    fn merge_into_missing_document_creates_it() {
        let merged = merge_fields(
            None,
            Map::from_iter([("budget".to_owned(), Value::from(5))]),
            &UserId::new("u1"),
            datetime!(2024-03-01 12:00:00 UTC),
        );

        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn accepts_plain_email_addresses() {
        assert!(is_valid_email("alice@example.com"));
        assert!(is_valid_email("a.b+c@mail.example.org"));
    }

    #[test]
    fn rejects_malformed_email_addresses() {
        for email in [
            "",
            "alice",
            "alice@",
            "@example.com",
            "a@b",
            "a b@c.d",
            "a@b@c.d",
            "a@b..c",
            "a@b.c.",
            "a..b@c.d",
            "a@-b.c",
            "a@[127.0.0.1]",
            "Alice <alice@example.com>",
        ] {
            assert!(!is_valid_email(email), "{email} should be rejected");
        }
    }
}
