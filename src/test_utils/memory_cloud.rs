use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::cloud::{
    DocumentListener, DocumentSnapshot, DocumentStore, FederatedCredential, FederatedProvider,
    IdentityProvider, ProviderError, Session, SignInMethod, User, UserId, codes, is_valid_email,
    merge_fields,
};

/// The shortest password the in-memory platform accepts.
const MIN_PASSWORD_LENGTH: usize = 6;

struct Account {
    user: User,
    password: Option<String>,
    disabled: bool,
}

#[derive(Default)]
struct Platform {
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, UserId>,
    documents: HashMap<(String, String), watch::Sender<DocumentSnapshot>>,
    password_resets: Vec<String>,
    offline: bool,
}

impl Platform {
    fn check_online(&self) -> Result<(), ProviderError> {
        if self.offline {
            Err(ProviderError::network("the platform is offline"))
        } else {
            Ok(())
        }
    }

    fn open_session(&mut self, user: User) -> Session {
        let token = Uuid::new_v4().simple().to_string();
        self.tokens.insert(token.clone(), user.id.clone());

        Session { user, token }
    }

    fn document(&mut self, collection: &str, id: &str) -> &watch::Sender<DocumentSnapshot> {
        self.documents
            .entry((collection.to_owned(), id.to_owned()))
            .or_insert_with(|| watch::channel(DocumentSnapshot::missing()).0)
    }
}

/// A process-local cloud platform.
///
/// Accounts and documents live in memory and are shared by every handle created
/// with [InMemoryCloud::connect], while each handle keeps its own session, much
/// like two devices signed in to the same platform.
#[derive(Clone, Default)]
pub struct InMemoryCloud {
    platform: Arc<Mutex<Platform>>,
    session: Arc<Mutex<Option<Session>>>,
}

impl InMemoryCloud {
    /// Create an empty platform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Another client of the same platform with its own session.
    pub fn connect(&self) -> Self {
        Self {
            platform: self.platform.clone(),
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Make every request fail as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.platform().offline = offline;
    }

    /// Block the account registered to `email` from signing in.
    pub fn disable_account(&self, email: &str) {
        if let Some(account) = self.platform().accounts.get_mut(email) {
            account.disabled = true;
        }
    }

    /// The email addresses a password reset was requested for, oldest first.
    pub fn password_reset_requests(&self) -> Vec<String> {
        self.platform().password_resets.clone()
    }

    fn platform(&self) -> MutexGuard<'_, Platform> {
        self.platform.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check the session may access `id` and return the signed-in account ID.
    fn authorize(&self, platform: &Platform, id: &str) -> Result<UserId, ProviderError> {
        platform.check_online()?;

        let session = self
            .session()
            .clone()
            .ok_or_else(|| ProviderError::new(codes::UNAUTHENTICATED, "no user is signed in"))?;

        let user_id = platform.tokens.get(&session.token).ok_or_else(|| {
            ProviderError::new(codes::ID_TOKEN_EXPIRED, "the session has been revoked")
        })?;

        if user_id.as_str() != id {
            return Err(ProviderError::new(
                codes::PERMISSION_DENIED,
                format!("{user_id} may not access document {id}"),
            ));
        }

        Ok(user_id.clone())
    }

    fn finish_sign_in(&self, session: Session) -> Session {
        *self.session() = Some(session.clone());
        session
    }
}

#[async_trait]
impl IdentityProvider for InMemoryCloud {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, ProviderError> {
        let session = {
            let mut platform = self.platform();
            platform.check_online()?;

            if !is_valid_email(email) {
                return Err(ProviderError::new(codes::INVALID_EMAIL, email));
            }

            if password.is_empty() {
                return Err(ProviderError::new(codes::MISSING_PASSWORD, "no password"));
            }

            if password.chars().count() < MIN_PASSWORD_LENGTH {
                return Err(ProviderError::new(
                    codes::WEAK_PASSWORD,
                    format!("passwords need at least {MIN_PASSWORD_LENGTH} characters"),
                ));
            }

            if platform.accounts.contains_key(email) {
                return Err(ProviderError::new(codes::EMAIL_ALREADY_IN_USE, email));
            }

            let user = User {
                id: UserId::new(Uuid::new_v4().simple().to_string()),
                email: email.to_owned(),
                provider: SignInMethod::Password,
            };
            platform.accounts.insert(
                email.to_owned(),
                Account {
                    user: user.clone(),
                    password: Some(password.to_owned()),
                    disabled: false,
                },
            );

            platform.open_session(user)
        };

        Ok(self.finish_sign_in(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError> {
        let session = {
            let mut platform = self.platform();
            platform.check_online()?;

            if !is_valid_email(email) {
                return Err(ProviderError::new(codes::INVALID_EMAIL, email));
            }

            if password.is_empty() {
                return Err(ProviderError::new(codes::MISSING_PASSWORD, "no password"));
            }

            let account = platform
                .accounts
                .get(email)
                .ok_or_else(|| ProviderError::new(codes::USER_NOT_FOUND, email))?;

            if account.disabled {
                return Err(ProviderError::new(codes::USER_DISABLED, email));
            }

            match account.password.as_deref() {
                Some(expected) if expected == password => {}
                Some(_) => return Err(ProviderError::new(codes::WRONG_PASSWORD, email)),
                None => return Err(ProviderError::new(codes::INVALID_CREDENTIAL, email)),
            }

            let user = account.user.clone();
            platform.open_session(user)
        };

        Ok(self.finish_sign_in(session))
    }

    async fn sign_in_with_provider(
        &self,
        provider: FederatedProvider,
        credential: FederatedCredential,
    ) -> Result<Session, ProviderError> {
        let email = match credential {
            FederatedCredential::Assertion { email } => email,
            FederatedCredential::Cancelled => {
                return Err(ProviderError::new(
                    codes::POPUP_CLOSED_BY_USER,
                    "the sign-in flow was closed before it finished",
                ));
            }
        };

        let session = {
            let mut platform = self.platform();
            platform.check_online()?;

            if !is_valid_email(&email) {
                return Err(ProviderError::new(codes::INVALID_EMAIL, email));
            }

            let account = platform.accounts.entry(email.clone()).or_insert_with(|| Account {
                user: User {
                    id: UserId::new(Uuid::new_v4().simple().to_string()),
                    email: email.clone(),
                    provider: provider.into(),
                },
                password: None,
                disabled: false,
            });

            if account.disabled {
                return Err(ProviderError::new(codes::USER_DISABLED, email));
            }

            let user = account.user.clone();
            platform.open_session(user)
        };

        Ok(self.finish_sign_in(session))
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let Some(session) = self.session().take() else {
            return Ok(());
        };

        let mut platform = self.platform();
        platform.check_online()?;
        platform.tokens.remove(&session.token);

        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        let mut platform = self.platform();
        platform.check_online()?;

        if !is_valid_email(email) {
            return Err(ProviderError::new(codes::INVALID_EMAIL, email));
        }

        if !platform.accounts.contains_key(email) {
            return Err(ProviderError::new(codes::USER_NOT_FOUND, email));
        }

        platform.password_resets.push(email.to_owned());

        Ok(())
    }

    fn restore_session(&self, session: Session) {
        *self.session() = Some(session);
    }

    fn current_session(&self) -> Option<Session> {
        self.session().clone()
    }
}

#[async_trait]
impl DocumentStore for InMemoryCloud {
    async fn get(&self, collection: &str, id: &str) -> Result<DocumentSnapshot, ProviderError> {
        let platform = self.platform();
        self.authorize(&platform, id)?;

        Ok(platform
            .documents
            .get(&(collection.to_owned(), id.to_owned()))
            .map(|document| document.borrow().clone())
            .unwrap_or_else(DocumentSnapshot::missing))
    }

    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), ProviderError> {
        let mut platform = self.platform();
        let user_id = self.authorize(&platform, id)?;

        let now = OffsetDateTime::now_utc();
        platform.document(collection, id).send_modify(|snapshot| {
            snapshot.data = Some(merge_fields(snapshot.data.take(), fields, &user_id, now));
            snapshot.last_modified = Some(now);
            snapshot.revision += 1;
        });

        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), ProviderError> {
        let mut platform = self.platform();
        self.authorize(&platform, id)?;

        platform.document(collection, id).send_if_modified(|snapshot| {
            if snapshot.data.is_none() {
                return false;
            }

            snapshot.data = None;
            snapshot.last_modified = Some(OffsetDateTime::now_utc());
            snapshot.revision += 1;
            true
        });

        Ok(())
    }

    async fn listen(&self, collection: &str, id: &str) -> Result<DocumentListener, ProviderError> {
        let mut receiver = {
            let mut platform = self.platform();
            self.authorize(&platform, id)?;
            platform.document(collection, id).subscribe()
        };

        let (sender, listener) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            loop {
                let snapshot = receiver.borrow_and_update().clone();

                if sender.send(Ok(snapshot)).await.is_err() || receiver.changed().await.is_err() {
                    break;
                }
            }
        });

        Ok(DocumentListener::new(listener, task))
    }
}

#[cfg(test)]
mod in_memory_cloud_tests {
    use serde_json::{Map, Value, json};

    use crate::{
        cloud::{
            DocumentStore, FederatedCredential, FederatedProvider, IdentityProvider, SignInMethod,
            codes,
        },
        test_utils::InMemoryCloud,
    };

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn sign_up_then_sign_in_returns_same_user() {
        let cloud = InMemoryCloud::new();

        let signed_up = cloud.sign_up("a@example.com", "hunter22").await.unwrap();
        cloud.sign_out().await.unwrap();
        let signed_in = cloud.sign_in("a@example.com", "hunter22").await.unwrap();

        assert_eq!(signed_up.user, signed_in.user);
        assert_eq!(signed_in.user.provider, SignInMethod::Password);
        assert_eq!(cloud.current_session(), Some(signed_in));
    }

    #[tokio::test]
    async fn sign_up_rejects_duplicate_email() {
        let cloud = InMemoryCloud::new();
        cloud.sign_up("a@example.com", "hunter22").await.unwrap();

        let error = cloud
            .connect()
            .sign_up("a@example.com", "hunter22")
            .await
            .unwrap_err();

        assert_eq!(error.code, codes::EMAIL_ALREADY_IN_USE);
    }

    #[tokio::test]
    async fn sign_up_rejects_short_password() {
        let error = InMemoryCloud::new()
            .sign_up("a@example.com", "abc")
            .await
            .unwrap_err();

        assert_eq!(error.code, codes::WEAK_PASSWORD);
    }

    #[tokio::test]
    async fn sign_in_reports_wrong_password_and_unknown_user() {
        let cloud = InMemoryCloud::new();
        cloud.sign_up("a@example.com", "hunter22").await.unwrap();

        let wrong = cloud.sign_in("a@example.com", "hunter23").await.unwrap_err();
        let unknown = cloud.sign_in("b@example.com", "hunter22").await.unwrap_err();

        assert_eq!(wrong.code, codes::WRONG_PASSWORD);
        assert_eq!(unknown.code, codes::USER_NOT_FOUND);
    }

    #[tokio::test]
    async fn federated_sign_in_reuses_account() {
        let cloud = InMemoryCloud::new();
        let credential = FederatedCredential::Assertion {
            email: "a@example.com".to_owned(),
        };

        let first = cloud
            .sign_in_with_provider(FederatedProvider::GitHub, credential.clone())
            .await
            .unwrap();
        let second = cloud
            .connect()
            .sign_in_with_provider(FederatedProvider::GitHub, credential)
            .await
            .unwrap();

        assert_eq!(first.user, second.user);
        assert_eq!(first.user.provider, SignInMethod::GitHub);
    }

    #[tokio::test]
    async fn documents_are_private_to_their_owner() {
        let cloud = InMemoryCloud::new();
        let owner = cloud.sign_up("a@example.com", "hunter22").await.unwrap();
        let other = cloud.connect();
        other.sign_up("b@example.com", "hunter22").await.unwrap();

        let error = other
            .get("budgets", owner.user.id.as_str())
            .await
            .unwrap_err();

        assert_eq!(error.code, codes::PERMISSION_DENIED);
    }

    #[tokio::test]
    async fn documents_require_a_session() {
        let error = InMemoryCloud::new().get("budgets", "u1").await.unwrap_err();

        assert_eq!(error.code, codes::UNAUTHENTICATED);
    }

    #[tokio::test]
    async fn merge_stamps_owner_and_bumps_revision() {
        let cloud = InMemoryCloud::new();
        let session = cloud.sign_up("a@example.com", "hunter22").await.unwrap();
        let id = session.user.id.as_str();

        cloud
            .merge("budgets", id, fields(json!({"budget": 10})))
            .await
            .unwrap();
        cloud
            .merge("budgets", id, fields(json!({"expenses": []})))
            .await
            .unwrap();
        let snapshot = cloud.get("budgets", id).await.unwrap();

        let data = snapshot.data.unwrap();
        assert_eq!(snapshot.revision, 2);
        assert_eq!(data["budget"], json!(10));
        assert_eq!(data["expenses"], json!([]));
        assert_eq!(data["userId"], json!(id));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let cloud = InMemoryCloud::new();
        let session = cloud.sign_up("a@example.com", "hunter22").await.unwrap();
        let id = session.user.id.as_str();
        cloud
            .merge("budgets", id, fields(json!({"budget": 10})))
            .await
            .unwrap();

        cloud.delete("budgets", id).await.unwrap();
        cloud.delete("budgets", id).await.unwrap();

        let snapshot = cloud.get("budgets", id).await.unwrap();
        assert!(!snapshot.exists());
        assert_eq!(snapshot.revision, 2);
    }

    #[tokio::test]
    async fn listener_sees_current_state_then_changes() {
        let cloud = InMemoryCloud::new();
        let session = cloud.sign_up("a@example.com", "hunter22").await.unwrap();
        let id = session.user.id.as_str();

        let mut listener = cloud.listen("budgets", id).await.unwrap();
        let first = listener.next().await.unwrap().unwrap();
        cloud
            .merge("budgets", id, fields(json!({"budget": 10})))
            .await
            .unwrap();
        let second = listener.next().await.unwrap().unwrap();

        assert!(!first.exists());
        assert_eq!(second.data.unwrap()["budget"], json!(10));
    }

    #[tokio::test]
    async fn revoked_session_cannot_read_documents() {
        let cloud = InMemoryCloud::new();
        let session = cloud.sign_up("a@example.com", "hunter22").await.unwrap();
        let device = cloud.connect();
        device.restore_session(session.clone());

        cloud.sign_out().await.unwrap();
        let error = device
            .get("budgets", session.user.id.as_str())
            .await
            .unwrap_err();

        assert_eq!(error.code, codes::ID_TOKEN_EXPIRED);
    }

    #[tokio::test]
    async fn offline_platform_reports_network_errors() {
        let cloud = InMemoryCloud::new();
        cloud.set_offline(true);

        let error = cloud.sign_in("a@example.com", "hunter22").await.unwrap_err();

        assert_eq!(error.code, codes::NETWORK_REQUEST_FAILED);
    }

    #[tokio::test]
    async fn password_reset_is_recorded_for_known_accounts() {
        let cloud = InMemoryCloud::new();
        cloud.sign_up("a@example.com", "hunter22").await.unwrap();

        cloud.send_password_reset("a@example.com").await.unwrap();
        let unknown = cloud.send_password_reset("b@example.com").await.unwrap_err();

        assert_eq!(cloud.password_reset_requests(), vec!["a@example.com"]);
        assert_eq!(unknown.code, codes::USER_NOT_FOUND);
    }
}
