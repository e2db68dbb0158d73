use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::cloud::{
    DocumentListener, DocumentSnapshot, DocumentStore, FederatedCredential, FederatedProvider,
    IdentityProvider, ProviderError, Session, codes,
    endpoints::{self, format_endpoint},
    wire::{CredentialsRequest, ErrorBody, FederatedRequest, MergeRequest, PasswordResetRequest},
};

/// How long a single long-poll request may stay open, longer than the
/// emulator holds a listen request.
const LISTEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const LISTEN_BACKOFF_MS: u64 = 500;
const LISTEN_MAX_BACKOFF_MS: u64 = 10_000;

/// Talks to the cloud platform over HTTP.
///
/// Cloning the client shares the session, so the same client can be handed out
/// as both the [IdentityProvider] and the [DocumentStore].
#[derive(Clone)]
pub struct CloudClient {
    base_url: String,
    http: reqwest::Client,
    session: Arc<RwLock<Option<Session>>>,
}

impl CloudClient {
    /// Create a client for the platform at `base_url`, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http,
            session: Arc::new(RwLock::new(None)),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    fn document_url(&self, endpoint: &str, collection: &str, id: &str) -> String {
        self.url(&format_endpoint(
            endpoint,
            &[("collection", collection), ("id", id)],
        ))
    }

    fn token(&self) -> Result<String, ProviderError> {
        self.current_session()
            .map(|session| session.token)
            .ok_or_else(|| ProviderError::new(codes::UNAUTHENTICATED, "no user is signed in"))
    }

    fn set_session(&self, session: Option<Session>) {
        match self.session.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }

    async fn start_session(&self, request: RequestBuilder) -> Result<Session, ProviderError> {
        let session: Session = send_json(request).await?;
        self.set_session(Some(session.clone()));
        tracing::info!("signed in as {}", session.user.id);

        Ok(session)
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ProviderError> {
    let response = send(request).await?;

    response
        .json()
        .await
        .map_err(|error| ProviderError::new(codes::INTERNAL, format!("invalid response: {error}")))
}

async fn send(request: RequestBuilder) -> Result<Response, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|error| ProviderError::network(error.to_string()))?;

    if response.status().is_success() {
        Ok(response)
    } else {
        Err(error_from_response(response).await)
    }
}

async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status();

    match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) if status == StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::new(codes::TOO_MANY_REQUESTS, "the platform is throttling requests")
        }
        Err(_) => ProviderError::new(codes::INTERNAL, format!("unexpected status {status}")),
    }
}

#[async_trait]
impl IdentityProvider for CloudClient {
    #[instrument(skip(self, password))]
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, ProviderError> {
        let request = self.http.post(self.url(endpoints::SIGN_UP)).json(&CredentialsRequest {
            email: email.to_owned(),
            password: password.to_owned(),
        });

        self.start_session(request).await
    }

    #[instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, ProviderError> {
        let request = self.http.post(self.url(endpoints::SIGN_IN)).json(&CredentialsRequest {
            email: email.to_owned(),
            password: password.to_owned(),
        });

        self.start_session(request).await
    }

    #[instrument(skip(self, credential))]
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

        let request = self
            .http
            .post(self.url(endpoints::FEDERATED_SIGN_IN))
            .json(&FederatedRequest { provider, email });

        self.start_session(request).await
    }

    #[instrument(skip(self))]
    async fn sign_out(&self) -> Result<(), ProviderError> {
        let Some(session) = self.current_session() else {
            return Ok(());
        };
        self.set_session(None);

        let request = self
            .http
            .post(self.url(endpoints::SIGN_OUT))
            .bearer_auth(&session.token);
        send(request).await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        let request = self
            .http
            .post(self.url(endpoints::PASSWORD_RESET))
            .json(&PasswordResetRequest {
                email: email.to_owned(),
            });
        send(request).await?;

        Ok(())
    }

    fn restore_session(&self, session: Session) {
        self.set_session(Some(session));
    }

    fn current_session(&self) -> Option<Session> {
        match self.session.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl DocumentStore for CloudClient {
    #[instrument(skip(self))]
    async fn get(&self, collection: &str, id: &str) -> Result<DocumentSnapshot, ProviderError> {
        let request = self
            .http
            .get(self.document_url(endpoints::DOCUMENT, collection, id))
            .bearer_auth(self.token()?);

        match send_json(request).await {
            Err(error) if error.code == codes::NOT_FOUND => Ok(DocumentSnapshot::missing()),
            result => result,
        }
    }

    #[instrument(skip(self, fields))]
    async fn merge(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), ProviderError> {
        let request = self
            .http
            .patch(self.document_url(endpoints::DOCUMENT, collection, id))
            .bearer_auth(self.token()?)
            .json(&MergeRequest { fields });
        send(request).await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> Result<(), ProviderError> {
        let request = self
            .http
            .delete(self.document_url(endpoints::DOCUMENT, collection, id))
            .bearer_auth(self.token()?);
        send(request).await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn listen(&self, collection: &str, id: &str) -> Result<DocumentListener, ProviderError> {
        let url = self.document_url(endpoints::DOCUMENT_LISTEN, collection, id);
        let token = self.token()?;
        let (sender, receiver) = mpsc::channel(16);

        let task = tokio::spawn(poll_document(self.http.clone(), url, token, sender));

        Ok(DocumentListener::new(receiver, task))
    }
}

/// Long-poll the listen endpoint and forward every new revision to `sender`.
///
/// Stops when the receiver is dropped or the token is rejected.
async fn poll_document(
    http: reqwest::Client,
    url: String,
    token: String,
    sender: mpsc::Sender<Result<DocumentSnapshot, ProviderError>>,
) {
    let mut after: Option<u64> = None;
    let mut failures: u64 = 0;

    loop {
        let target = match after {
            Some(revision) => format!("{url}?after={revision}"),
            None => url.clone(),
        };
        let request = http
            .get(&target)
            .bearer_auth(&token)
            .timeout(LISTEN_REQUEST_TIMEOUT);

        let result = match send(request).await {
            Ok(response) if response.status() == StatusCode::NO_CONTENT => {
                failures = 0;
                continue;
            }
            Ok(response) => response.json::<DocumentSnapshot>().await.map_err(|error| {
                ProviderError::new(codes::INTERNAL, format!("invalid snapshot: {error}"))
            }),
            Err(error) => Err(error),
        };

        match result {
            Ok(snapshot) => {
                failures = 0;
                after = Some(snapshot.revision);

                if sender.send(Ok(snapshot)).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                failures += 1;
                let rejected = [
                    codes::UNAUTHENTICATED,
                    codes::ID_TOKEN_EXPIRED,
                    codes::PERMISSION_DENIED,
                ]
                .contains(&error.code.as_str());

                tracing::warn!("listening to {url} failed (attempt {failures}): {error}");

                if sender.send(Err(error)).await.is_err() || rejected {
                    break;
                }

                tokio::time::sleep(Duration::from_millis(
                    LISTEN_BACKOFF_MS
                        .saturating_mul(failures)
                        .min(LISTEN_MAX_BACKOFF_MS),
                ))
                .await;
            }
        }
    }
}
