//! STS Module - scoped temporary credentials
//!
//! The broker exchanges the long-lived account key for short-lived
//! credentials restricted by a per-user policy. Provider failures are mapped
//! to a fixed set of kinds through one classification table.

mod aliyun;
mod broker;
mod classify;
mod client;
mod session;

pub use aliyun::{AliyunStsClient, STS_API_VERSION};
pub use broker::CredentialBroker;
pub use classify::{classify, ProviderErrorKind};
pub use client::{AssumeRoleRequest, AssumeRoleResponse, CredentialBundle, TrustExchange};
pub use session::{SessionDuration, SessionName};

use crate::config::ConfigError;
use crate::policy::PolicyError;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Storage quota exceeded: {used} of {quota} bytes used")]
    QuotaExceeded { used: u64, quota: u64 },

    #[error("Provider rejected the request ({kind})")]
    Provider {
        kind: ProviderErrorKind,
        diagnostic: ProviderDiagnostic,
    },

    #[error("Unexpected provider failure")]
    Unknown { diagnostic: ProviderDiagnostic },

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
}

impl BrokerError {
    /// Provider diagnostic, when the failure came from the provider
    pub fn diagnostic(&self) -> Option<&ProviderDiagnostic> {
        match self {
            BrokerError::Provider { diagnostic, .. } | BrokerError::Unknown { diagnostic } => {
                Some(diagnostic)
            }
            _ => None,
        }
    }
}

/// What the provider said about a failed call
///
/// Never contains request parameters or secret material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDiagnostic {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl ProviderDiagnostic {
    /// Diagnostic for a failure that never produced a provider response
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for ProviderDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message)?,
            None => f.write_str(&self.message)?,
        }
        if let Some(request_id) = &self.request_id {
            write!(f, " (request {})", request_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display() {
        let diagnostic = ProviderDiagnostic {
            code: Some("NoPermission".to_string()),
            message: "You are not authorized".to_string(),
            request_id: Some("req-1".to_string()),
            http_status: Some(403),
        };
        assert_eq!(
            diagnostic.to_string(),
            "[NoPermission] You are not authorized (request req-1)"
        );
        assert_eq!(ProviderDiagnostic::transport("timed out").to_string(), "timed out");
    }

    #[test]
    fn test_diagnostic_accessor() {
        let err = BrokerError::Unknown {
            diagnostic: ProviderDiagnostic::transport("boom"),
        };
        assert_eq!(err.diagnostic().map(|d| d.message.as_str()), Some("boom"));
        assert!(BrokerError::QuotaExceeded { used: 1, quota: 1 }
            .diagnostic()
            .is_none());
    }
}
