//! Shared test fixtures

use crate::config::AliyunConfig;
use crate::sts::{AssumeRoleRequest, AssumeRoleResponse, CredentialBundle, ProviderDiagnostic, TrustExchange};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Fully configured account settings with non-placeholder values
pub(crate) fn aliyun_config() -> AliyunConfig {
    AliyunConfig {
        access_key_id: "LTAI5tExampleKeyId".to_string(),
        access_key_secret: "s3cr3tValue".to_string(),
        role_arn: "acs:ram::1234567890123456:role/oss-uploader".to_string(),
        bucket: "media-bucket".to_string(),
        ..AliyunConfig::default()
    }
}

/// Trust exchange returning a canned outcome and counting calls
pub(crate) struct RecordingExchange {
    outcome: Result<AssumeRoleResponse, ProviderDiagnostic>,
    calls: AtomicUsize,
    last_request: Mutex<Option<AssumeRoleRequest>>,
}

impl RecordingExchange {
    pub(crate) fn succeeding() -> Self {
        Self::with_outcome(Ok(AssumeRoleResponse {
            request_id: Some("req-test".to_string()),
            credentials: CredentialBundle {
                access_key_id: "STS.test".to_string(),
                access_key_secret: "tmp-secret".to_string(),
                security_token: "tmp-token".to_string(),
                expiration: "2030-01-01T00:00:00Z".to_string(),
            },
        }))
    }

    pub(crate) fn failing(diagnostic: ProviderDiagnostic) -> Self {
        Self::with_outcome(Err(diagnostic))
    }

    fn with_outcome(outcome: Result<AssumeRoleResponse, ProviderDiagnostic>) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<AssumeRoleRequest> {
        self.last_request.lock().clone()
    }
}

#[async_trait]
impl TrustExchange for RecordingExchange {
    async fn assume_role(
        &self,
        request: &AssumeRoleRequest,
    ) -> Result<AssumeRoleResponse, ProviderDiagnostic> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());
        self.outcome.clone()
    }
}
