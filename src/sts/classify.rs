//! Provider error classification

use super::{BrokerError, ProviderDiagnostic};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Known causes of a provider rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderErrorKind {
    InvalidKey,
    SignatureMismatch,
    RoleNotFound,
    AccessDenied,
    MalformedPolicy,
    RateLimited,
    MalformedSessionName,
    InvalidDuration,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::InvalidKey => "invalid-key",
            ProviderErrorKind::SignatureMismatch => "signature-mismatch",
            ProviderErrorKind::RoleNotFound => "role-not-found",
            ProviderErrorKind::AccessDenied => "access-denied",
            ProviderErrorKind::MalformedPolicy => "malformed-policy",
            ProviderErrorKind::RateLimited => "rate-limited",
            ProviderErrorKind::MalformedSessionName => "malformed-session-name",
            ProviderErrorKind::InvalidDuration => "invalid-duration",
        }
    }

    /// Look up a provider error code
    pub fn from_code(code: &str) -> Option<Self> {
        CLASSIFICATION
            .iter()
            .find(|(codes, _)| codes.contains(&code))
            .map(|(_, kind)| *kind)
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const CLASSIFICATION: &[(&[&str], ProviderErrorKind)] = &[
    (
        &["InvalidAccessKeyId.NotFound", "InvalidAccessKeyId.Inactive"],
        ProviderErrorKind::InvalidKey,
    ),
    (
        &["SignatureDoesNotMatch", "IncompleteSignature"],
        ProviderErrorKind::SignatureMismatch,
    ),
    (
        &["EntityNotExist.Role", "NoSuchRole"],
        ProviderErrorKind::RoleNotFound,
    ),
    (
        &["AccessDenied", "NoPermission", "Forbidden.RAM"],
        ProviderErrorKind::AccessDenied,
    ),
    (
        &[
            "InvalidParameter.Policy",
            "InvalidParameter.PolicyGrammar",
            "InvalidParameter.PolicySize",
        ],
        ProviderErrorKind::MalformedPolicy,
    ),
    (
        &["Throttling", "Throttling.User", "Throttling.Api"],
        ProviderErrorKind::RateLimited,
    ),
    (
        &["InvalidParameter.RoleSessionName"],
        ProviderErrorKind::MalformedSessionName,
    ),
    (
        &["InvalidParameter.DurationSeconds"],
        ProviderErrorKind::InvalidDuration,
    ),
];

/// Map a provider failure to a broker error
///
/// Codes outside the table, and failures without a code, become
/// `BrokerError::Unknown` with the diagnostic kept intact.
pub fn classify(diagnostic: ProviderDiagnostic) -> BrokerError {
    match diagnostic.code.as_deref().and_then(ProviderErrorKind::from_code) {
        Some(kind) => BrokerError::Provider { kind, diagnostic },
        None => BrokerError::Unknown { diagnostic },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coded(code: &str) -> ProviderDiagnostic {
        ProviderDiagnostic {
            code: Some(code.to_string()),
            message: "rejected".to_string(),
            request_id: Some("req".to_string()),
            http_status: Some(400),
        }
    }

    fn kind_of(code: &str) -> Option<ProviderErrorKind> {
        match classify(coded(code)) {
            BrokerError::Provider { kind, .. } => Some(kind),
            _ => None,
        }
    }

    #[test]
    fn test_every_table_code() {
        for (codes, kind) in CLASSIFICATION {
            for code in codes.iter() {
                assert_eq!(kind_of(code), Some(*kind), "code {}", code);
            }
        }
    }

    #[test]
    fn test_known_codes() {
        assert_eq!(kind_of("NoPermission"), Some(ProviderErrorKind::AccessDenied));
        assert_eq!(kind_of("Throttling.User"), Some(ProviderErrorKind::RateLimited));
        assert_eq!(
            kind_of("InvalidParameter.RoleSessionName"),
            Some(ProviderErrorKind::MalformedSessionName)
        );
    }

    #[test]
    fn test_unknown_code_preserved() {
        match classify(coded("InternalError")) {
            BrokerError::Unknown { diagnostic } => {
                assert_eq!(diagnostic.code.as_deref(), Some("InternalError"));
            }
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_code() {
        let result = classify(ProviderDiagnostic::transport("connection reset"));
        assert!(matches!(result, BrokerError::Unknown { .. }));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ProviderErrorKind::SignatureMismatch.as_str(), "signature-mismatch");
        assert_eq!(
            serde_json::to_string(&ProviderErrorKind::MalformedSessionName).unwrap(),
            "\"malformed-session-name\""
        );
    }
}
