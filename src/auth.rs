//! Signing in and out of the cloud platform and tracking who is signed in.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use crate::{
    Error,
    cloud::{
        FederatedCredential, FederatedProvider, IdentityProvider, ProviderError, Session, User,
        codes,
    },
    storage::{LocalKeyValueStore, SESSION_KEY},
};

/// The message shown for errors without a specific message.
pub const GENERIC_FAILURE_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// The user-facing message for a platform error code.
pub fn friendly_message(code: &str) -> &'static str {
    match code {
        codes::EMAIL_ALREADY_IN_USE => "An account with this email already exists.",
        codes::INVALID_EMAIL => "Please enter a valid email address.",
        codes::WEAK_PASSWORD => "Password is too weak. Please choose a stronger password.",
        codes::USER_NOT_FOUND => "No account found with this email.",
        codes::WRONG_PASSWORD => "Incorrect password. Please try again.",
        codes::INVALID_CREDENTIAL => "Invalid email or password.",
        codes::TOO_MANY_REQUESTS => "Too many attempts. Please try again later.",
        codes::NETWORK_REQUEST_FAILED => "Network error. Please check your connection.",
        codes::USER_DISABLED => "This account has been disabled.",
        codes::OPERATION_NOT_ALLOWED => "This sign-in method is not enabled.",
        codes::POPUP_CLOSED_BY_USER => "Sign-in was cancelled.",
        codes::MISSING_PASSWORD => "Please enter a password.",
        codes::ID_TOKEN_EXPIRED => "Your session has expired. Please sign in again.",
        _ => GENERIC_FAILURE_MESSAGE,
    }
}

/// Why an account operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AuthFailure {
    /// The platform error code, e.g. `auth/wrong-password`.
    pub code: String,
    /// A message suitable for showing to the user.
    pub message: String,
}

impl AuthFailure {
    /// The failure for a platform error code.
    pub fn from_code(code: &str) -> Self {
        Self {
            code: code.to_owned(),
            message: friendly_message(code).to_owned(),
        }
    }
}

impl From<ProviderError> for AuthFailure {
    fn from(error: ProviderError) -> Self {
        tracing::warn!("the platform rejected an account operation: {error}");
        Self::from_code(&error.code)
    }
}

/// The result of an account operation.
pub type AuthResult<T> = Result<T, AuthFailure>;

type AuthCallback = Arc<dyn Fn(Option<&User>) + Send + Sync>;

/// Remembers the signed-in session on this device between runs.
#[derive(Debug, Clone)]
struct SessionCache {
    items: LocalKeyValueStore,
}

impl SessionCache {
    fn load(&self) -> Option<Session> {
        let text = match self.items.get_item(SESSION_KEY) {
            Ok(text) => text?,
            Err(error) => {
                tracing::warn!("could not read the saved session: {error}");
                return None;
            }
        };

        serde_json::from_str(&text)
            .inspect_err(|error| tracing::warn!("ignoring the corrupt saved session: {error}"))
            .ok()
    }

    fn save(&self, session: &Session) {
        let result = serde_json::to_string(session)
            .map_err(|error| Error::Serialization(error.to_string()))
            .and_then(|text| self.items.set_item(SESSION_KEY, &text));

        if let Err(error) = result {
            tracing::warn!("could not save the session: {error}");
        }
    }

    fn clear(&self) {
        if let Err(error) = self.items.remove_item(SESSION_KEY) {
            tracing::warn!("could not forget the saved session: {error}");
        }
    }
}

/// Signs users in and out through an [IdentityProvider] and announces changes.
#[derive(Clone)]
pub struct AuthManager {
    provider: Arc<dyn IdentityProvider>,
    state: Arc<watch::Sender<Option<User>>>,
    callback: Arc<Mutex<Option<AuthCallback>>>,
    sessions: Option<SessionCache>,
}

impl AuthManager {
    /// Manage the account signed in to `provider`, if any.
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let user = provider.current_session().map(|session| session.user);

        Self {
            provider,
            state: Arc::new(watch::Sender::new(user)),
            callback: Arc::new(Mutex::new(None)),
            sessions: None,
        }
    }

    /// Keep the session in `items` so later runs stay signed in.
    ///
    /// A session saved by an earlier run is restored if the provider has none.
    pub fn with_session_cache(mut self, items: LocalKeyValueStore) -> Self {
        let sessions = SessionCache { items };

        if self.provider.current_session().is_none()
            && let Some(session) = sessions.load()
        {
            tracing::debug!("restoring the saved session of {}", session.user.email);
            self.provider.restore_session(session.clone());
            self.state.send_replace(Some(session.user));
        }

        self.sessions = Some(sessions);
        self
    }

    /// Register a new account and sign in as it.
    ///
    /// # Errors
    /// Returns an [AuthFailure] if the platform rejects the account, e.g. the
    /// email is taken or the password is too weak.
    pub async fn sign_up(&self, email: &str, password: &str) -> AuthResult<User> {
        if password.is_empty() {
            return Err(AuthFailure::from_code(codes::MISSING_PASSWORD));
        }

        let session = self.provider.sign_up(email.trim(), password).await?;

        Ok(self.signed_in(session))
    }

    /// Sign in with an email and password.
    ///
    /// # Errors
    /// Returns an [AuthFailure] if the credentials are wrong or the platform
    /// cannot be reached.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<User> {
        if password.is_empty() {
            return Err(AuthFailure::from_code(codes::MISSING_PASSWORD));
        }

        let session = self.provider.sign_in(email.trim(), password).await?;

        Ok(self.signed_in(session))
    }

    /// Sign in with a third-party identity.
    ///
    /// # Errors
    /// Returns an [AuthFailure] if the user cancelled or the platform rejects
    /// the identity.
    pub async fn sign_in_with_federated_provider(
        &self,
        provider: FederatedProvider,
        credential: FederatedCredential,
    ) -> AuthResult<User> {
        let session = self
            .provider
            .sign_in_with_provider(provider, credential)
            .await?;

        Ok(self.signed_in(session))
    }

    /// Sign out.
    ///
    /// The user is signed out on this device even if the platform could not
    /// revoke the session.
    ///
    /// # Errors
    /// This currently always succeeds.
    pub async fn sign_out(&self) -> AuthResult<()> {
        if let Err(error) = self.provider.sign_out().await {
            tracing::warn!("could not revoke the session: {error}");
        }

        if let Some(sessions) = &self.sessions {
            sessions.clear();
        }
        self.set_state(None);

        Ok(())
    }

    /// Ask the platform to send a password reset message to `email`.
    ///
    /// # Errors
    /// Returns an [AuthFailure] if the email is invalid or the platform cannot
    /// be reached.
    pub async fn reset_password(&self, email: &str) -> AuthResult<()> {
        self.provider.send_password_reset(email.trim()).await?;
        tracing::info!("requested a password reset for {}", email.trim());

        Ok(())
    }

    /// The signed-in user, if any.
    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().clone()
    }

    /// Whether a user is signed in.
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Resume a session saved by an earlier run.
    pub fn restore_session(&self, session: Session) {
        self.signed_in(session);
    }

    /// The signed-in session, if any.
    pub fn current_session(&self) -> Option<Session> {
        self.provider.current_session()
    }

    /// Call `callback` now with the signed-in user and again whenever a user
    /// signs in or out. Replaces the previously registered callback.
    pub fn on_auth_state_changed<F>(&self, callback: F)
    where
        F: Fn(Option<&User>) + Send + Sync + 'static,
    {
        let callback: AuthCallback = Arc::new(callback);
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(callback.clone());

        callback(self.current_user().as_ref());
    }

    /// A receiver that sees the signed-in user change.
    pub fn auth_state(&self) -> watch::Receiver<Option<User>> {
        self.state.subscribe()
    }

    fn signed_in(&self, session: Session) -> User {
        let user = session.user.clone();

        self.provider.restore_session(session.clone());
        if let Some(sessions) = &self.sessions {
            sessions.save(&session);
        }
        self.set_state(Some(user.clone()));

        tracing::info!("signed in as {}", user.email);

        user
    }

    fn set_state(&self, user: Option<User>) {
        let changed = self.state.send_if_modified(|current| {
            if *current == user {
                return false;
            }

            *current = user.clone();
            true
        });

        if !changed {
            return;
        }

        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(callback) = callback {
            callback(user.as_ref());
        }
    }
}

#[cfg(test)]
mod friendly_message_tests {
    use crate::{
        auth::{AuthFailure, GENERIC_FAILURE_MESSAGE, friendly_message},
        cloud::{ProviderError, codes},
    };

    #[test]
    fn known_codes_have_specific_messages() {
        for code in [
            codes::EMAIL_ALREADY_IN_USE,
            codes::INVALID_EMAIL,
            codes::WEAK_PASSWORD,
            codes::USER_NOT_FOUND,
            codes::WRONG_PASSWORD,
            codes::INVALID_CREDENTIAL,
            codes::TOO_MANY_REQUESTS,
            codes::NETWORK_REQUEST_FAILED,
            codes::USER_DISABLED,
            codes::OPERATION_NOT_ALLOWED,
            codes::POPUP_CLOSED_BY_USER,
            codes::MISSING_PASSWORD,
            codes::ID_TOKEN_EXPIRED,
        ] {
            assert_ne!(friendly_message(code), GENERIC_FAILURE_MESSAGE, "{code}");
        }
    }

    #[test]
    fn unknown_codes_fall_back_to_generic_message() {
        let failure = AuthFailure::from(ProviderError::new("auth/quota-exceeded", "boom"));

        assert_eq!(failure.code, "auth/quota-exceeded");
        assert_eq!(failure.message, GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn displays_the_user_facing_message() {
        let failure = AuthFailure::from_code(codes::WRONG_PASSWORD);

        assert_eq!(failure.to_string(), "Incorrect password. Please try again.");
    }
}
