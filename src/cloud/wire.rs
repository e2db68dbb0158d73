//! Request and response bodies shared by the HTTP client and the emulator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cloud::{FederatedProvider, ProviderError};

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FederatedRequest {
    pub provider: FederatedProvider,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MergeRequest {
    pub fields: Map<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListenQuery {
    pub after: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ProviderError,
}
