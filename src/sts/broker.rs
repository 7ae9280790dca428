//! Credential Broker
//!
//! Every check runs before the provider is contacted: a misconfigured
//! deployment or an over-quota user never costs a network round trip.

use super::{
    classify, AssumeRoleRequest, AssumeRoleResponse, BrokerError, SessionDuration, SessionName,
    TrustExchange,
};
use crate::config::AliyunConfig;
use crate::identity::Identity;
use crate::policy::PolicyDocument;
use crate::storage::{QuotaCheckResult, QuotaLedger};

use chrono::Utc;
use std::sync::Arc;

/// Issues scoped temporary credentials
#[derive(Clone)]
pub struct CredentialBroker {
    exchange: Arc<dyn TrustExchange>,
    config: AliyunConfig,
    duration: SessionDuration,
}

impl CredentialBroker {
    /// Create a broker; the duration must be 900..=3600 seconds
    pub fn new(
        exchange: Arc<dyn TrustExchange>,
        config: AliyunConfig,
        duration_secs: u64,
    ) -> Result<Self, BrokerError> {
        Ok(Self {
            exchange,
            config,
            duration: SessionDuration::new(duration_secs)?,
        })
    }

    pub fn duration(&self) -> SessionDuration {
        self.duration
    }

    /// Configuration and quota gate, run before any policy is built
    pub fn preflight(&self, identity: &Identity) -> Result<(), BrokerError> {
        self.config.check_role()?;
        self.config.check_credentials()?;

        if let QuotaCheckResult::Exceeded { used, quota } = QuotaLedger::check_quota(identity) {
            tracing::info!(
                "Refusing credentials for {}: {} of {} bytes used",
                identity.user_id,
                used,
                quota
            );
            return Err(BrokerError::QuotaExceeded { used, quota });
        }

        Ok(())
    }

    /// Exchange the account key for credentials restricted by `policy`
    pub async fn issue(
        &self,
        identity: &Identity,
        policy: &PolicyDocument,
    ) -> Result<AssumeRoleResponse, BrokerError> {
        self.preflight(identity)?;

        let request = AssumeRoleRequest {
            role_arn: self.config.role_arn.clone(),
            policy: policy.to_json()?,
            duration: self.duration,
            session_name: SessionName::derive(&identity.user_id, Utc::now()),
        };

        match self.exchange.assume_role(&request).await {
            Ok(response) => {
                tracing::info!(
                    "Issued credentials for {} (session {}, expires {})",
                    identity.user_id,
                    request.session_name,
                    response.credentials.expiration
                );
                Ok(response)
            }
            Err(diagnostic) => {
                let err = classify(diagnostic);
                tracing::warn!(
                    "AssumeRole failed for {}: {} {}",
                    identity.user_id,
                    err,
                    err.diagnostic().map(|d| d.to_string()).unwrap_or_default()
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::identity::UserId;
    use crate::policy::PolicyGenerator;
    use crate::sts::{ProviderDiagnostic, ProviderErrorKind};
    use crate::testing::{aliyun_config, RecordingExchange};

    fn policy() -> PolicyDocument {
        PolicyGenerator::new("media-bucket")
            .unwrap()
            .generate(&UserId::new("u1").unwrap(), 1024)
            .unwrap()
    }

    fn identity(quota: u64, used: u64) -> Identity {
        Identity::new(UserId::new("u1").unwrap(), quota).with_used_storage(used)
    }

    #[tokio::test]
    async fn test_issue_success() {
        let exchange = Arc::new(RecordingExchange::succeeding());
        let broker = CredentialBroker::new(exchange.clone(), aliyun_config(), 3600).unwrap();

        let response = broker.issue(&identity(1000, 10), &policy()).await.unwrap();
        assert_eq!(response.credentials.access_key_id, "STS.test");
        assert_eq!(exchange.calls(), 1);

        let request = exchange.last_request().unwrap();
        assert_eq!(request.policy, policy().to_json().unwrap());
        assert_eq!(request.duration.as_secs(), 3600);
        assert!(request.session_name.as_str().starts_with("oss-user-u1-"));
    }

    #[tokio::test]
    async fn test_quota_exceeded_never_calls_provider() {
        let exchange = Arc::new(RecordingExchange::succeeding());
        let broker = CredentialBroker::new(exchange.clone(), aliyun_config(), 3600).unwrap();

        let result = broker.issue(&identity(1000, 1000), &policy()).await;
        assert!(matches!(
            result,
            Err(BrokerError::QuotaExceeded { used: 1000, quota: 1000 })
        ));
        assert_eq!(exchange.calls(), 0);
    }

    #[test]
    fn test_preflight() {
        let exchange = Arc::new(RecordingExchange::succeeding());
        let broker = CredentialBroker::new(exchange.clone(), aliyun_config(), 3600).unwrap();

        assert!(broker.preflight(&identity(1000, 999)).is_ok());
        assert!(matches!(
            broker.preflight(&identity(1000, 1000)),
            Err(BrokerError::QuotaExceeded { used: 1000, quota: 1000 })
        ));
        assert_eq!(exchange.calls(), 0);
    }

    #[tokio::test]
    async fn test_placeholder_role_never_calls_provider() {
        let exchange = Arc::new(RecordingExchange::succeeding());
        let mut config = aliyun_config();
        config.role_arn = "acs:ram::your-account-id:role/your-role".to_string();
        let broker = CredentialBroker::new(exchange.clone(), config, 3600).unwrap();

        let result = broker.issue(&identity(1000, 0), &policy()).await;
        assert!(matches!(
            result,
            Err(BrokerError::Configuration(ConfigError::Placeholder(_)))
        ));
        assert_eq!(exchange.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_secret() {
        let exchange = Arc::new(RecordingExchange::succeeding());
        let mut config = aliyun_config();
        config.access_key_secret.clear();
        let broker = CredentialBroker::new(exchange.clone(), config, 3600).unwrap();

        let result = broker.issue(&identity(1000, 0), &policy()).await;
        assert!(matches!(
            result,
            Err(BrokerError::Configuration(ConfigError::Missing(_)))
        ));
        assert_eq!(exchange.calls(), 0);
    }

    #[test]
    fn test_duration_out_of_range() {
        let exchange = Arc::new(RecordingExchange::succeeding());
        let result = CredentialBroker::new(exchange, aliyun_config(), 7200);
        assert!(matches!(result, Err(BrokerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_provider_failure_classified() {
        let exchange = Arc::new(RecordingExchange::failing(ProviderDiagnostic {
            code: Some("EntityNotExist.Role".to_string()),
            message: "The role not exists".to_string(),
            request_id: Some("req-9".to_string()),
            http_status: Some(404),
        }));
        let broker = CredentialBroker::new(exchange.clone(), aliyun_config(), 900).unwrap();

        match broker.issue(&identity(1000, 0), &policy()).await {
            Err(BrokerError::Provider { kind, diagnostic }) => {
                assert_eq!(kind, ProviderErrorKind::RoleNotFound);
                assert_eq!(diagnostic.request_id.as_deref(), Some("req-9"));
            }
            other => panic!("expected Provider error, got {:?}", other),
        }
        assert_eq!(exchange.calls(), 1);
    }
}
