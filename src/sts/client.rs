//! Trust-exchange provider interface

use super::{ProviderDiagnostic, SessionDuration, SessionName};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameters of one AssumeRole call
#[derive(Debug, Clone)]
pub struct AssumeRoleRequest {
    pub role_arn: String,

    /// Policy document JSON, exactly as generated
    pub policy: String,

    pub duration: SessionDuration,
    pub session_name: SessionName,
}

/// Temporary credential bundle, never persisted
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBundle {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub security_token: String,

    /// Expiry as reported by the provider (ISO 8601, UTC)
    pub expiration: String,
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("security_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Successful AssumeRole result
#[derive(Debug, Clone)]
pub struct AssumeRoleResponse {
    pub request_id: Option<String>,
    pub credentials: CredentialBundle,
}

/// Exchanges the account key for scoped temporary credentials
#[async_trait]
pub trait TrustExchange: Send + Sync {
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<AssumeRoleResponse, ProviderDiagnostic>;
}
