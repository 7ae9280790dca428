//! OSSGate Core - Scoped Object-Storage Access Broker
//!
//! This crate hands end users short-lived credentials that only reach their
//! own `users/{id}/` prefix of a shared bucket, gates issuance on a storage
//! quota, and provides ownership-checked listing, deletion and share links
//! on top of the provider. Usage is kept in step with the bucket by
//! reconciliation from listings.

pub mod config;
pub mod crypto;
pub mod identity;
pub mod policy;
pub mod storage;
pub mod sts;

#[cfg(test)]
pub(crate) mod testing;

use config::{ConfigError, OssGateConfig, RunMode, HTTP_TIMEOUT_SECS};
use identity::{IdentityStore, UserId};
use policy::{PolicyDocument, PolicyGenerator};
use storage::{
    AliyunOssStore, ObjectStore, OssUrlSigner, QuotaLedger, QuotaSummary, ReconcileWorker, Reconciler,
    ShareLinkIssuer,
};
use sts::{AliyunStsClient, CredentialBroker, CredentialBundle, ProviderDiagnostic, TrustExchange};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Main error type for OSSGate operations
#[derive(Error, Debug)]
pub enum OssGateError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Identity error: {0}")]
    Identity(#[from] identity::IdentityError),

    #[error("Policy error: {0}")]
    Policy(#[from] policy::PolicyError),

    #[error("{0}")]
    Broker(#[from] sts::BrokerError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Cryptographic error: {0}")]
    Crypto(#[from] crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, OssGateError>;

impl OssGateError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        use identity::IdentityError;
        use policy::PolicyError;
        use storage::StorageError;
        use sts::BrokerError;

        fn identity_code(e: &IdentityError) -> &'static str {
            match e {
                IdentityError::InvalidUserId(_) => "INVALID_REQUEST",
                IdentityError::NotFound(_) => "NOT_FOUND",
                IdentityError::Backend(_) => "INTERNAL_ERROR",
            }
        }

        fn policy_code(e: &PolicyError) -> &'static str {
            match e {
                PolicyError::NonPositiveMaxSize | PolicyError::InvalidBucket(_) => "INVALID_REQUEST",
                PolicyError::Serialization(_) => "INTERNAL_ERROR",
            }
        }

        match self {
            OssGateError::Config(_) => "CONFIGURATION_ERROR",
            OssGateError::Identity(e) => identity_code(e),
            OssGateError::Policy(e) => policy_code(e),
            OssGateError::Broker(e) => match e {
                BrokerError::Configuration(_) => "CONFIGURATION_ERROR",
                BrokerError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
                BrokerError::Provider { .. } => "PROVIDER_ERROR",
                BrokerError::Unknown { .. } => "UNKNOWN_ERROR",
                BrokerError::Policy(e) => policy_code(e),
            },
            OssGateError::Storage(e) => match e {
                StorageError::Unauthorized { .. } => "AUTHORIZATION_ERROR",
                StorageError::InvalidKey(_)
                | StorageError::EmptyBatch
                | StorageError::InvalidExpiry(_) => "INVALID_REQUEST",
                StorageError::Provider { .. } => "STORAGE_ERROR",
                StorageError::Identity(e) => identity_code(e),
                StorageError::Signing(_) => "INTERNAL_ERROR",
            },
            OssGateError::Crypto(_) => "INTERNAL_ERROR",
        }
    }

    /// Provider error kind, for `PROVIDER_ERROR`
    pub fn provider_kind(&self) -> Option<sts::ProviderErrorKind> {
        match self {
            OssGateError::Broker(sts::BrokerError::Provider { kind, .. }) => Some(*kind),
            _ => None,
        }
    }

    pub fn diagnostic(&self) -> Option<&ProviderDiagnostic> {
        match self {
            OssGateError::Broker(e) => e.diagnostic(),
            _ => None,
        }
    }

    /// Render for a caller; provider diagnostics only outside production
    pub fn report(&self, mode: RunMode) -> ErrorReport {
        let keys = match self {
            OssGateError::Storage(storage::StorageError::Unauthorized { keys }) => keys.clone(),
            _ => Vec::new(),
        };

        ErrorReport {
            code: self.code(),
            kind: self.provider_kind().map(|k| k.as_str()),
            message: self.to_string(),
            keys,
            details: if mode.is_production() {
                None
            } else {
                self.diagnostic().cloned()
            },
        }
    }
}

/// Error as returned to API callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    pub message: String,

    /// Rejected object keys, for `AUTHORIZATION_ERROR`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ProviderDiagnostic>,
}

/// Install a `tracing` subscriber honouring `RUST_LOG`
///
/// Defaults to `ossgate_core=info`. Does nothing if a global subscriber is
/// already set.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ossgate_core=info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Everything a client needs to upload directly to its namespace
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialGrant {
    pub credentials: CredentialBundle,
    pub bucket: String,
    pub region: String,
    pub endpoint: String,

    /// Namespace prefix the credentials are confined to
    pub user_path: String,

    pub policy: PolicyDocument,

    /// Credential expiry, RFC 3339
    pub expiration: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Broker facade: one instance per process
#[derive(Clone)]
pub struct OssGate {
    config: OssGateConfig,
    identities: Arc<dyn IdentityStore>,
    policies: PolicyGenerator,
    broker: CredentialBroker,
    lister: storage::ObjectLister,
    deleter: storage::DeletionCoordinator,
    shares: ShareLinkIssuer,
    reconciler: Reconciler,
}

impl OssGate {
    /// Wire up the broker
    ///
    /// The returned worker performs background reconciliation and must be
    /// spawned by the caller; it stops once the gate and its clones are
    /// dropped.
    pub fn new(
        config: OssGateConfig,
        identities: Arc<dyn IdentityStore>,
        store: Arc<dyn ObjectStore>,
        exchange: Arc<dyn TrustExchange>,
    ) -> Result<(Self, ReconcileWorker)> {
        if config.aliyun.bucket.trim().is_empty() {
            return Err(ConfigError::Missing("OSS_BUCKET").into());
        }

        let policies =
            PolicyGenerator::new(config.aliyun.bucket.clone()).map_err(|e| ConfigError::Invalid {
                field: "OSS_BUCKET",
                reason: e.to_string(),
            })?;
        let broker = CredentialBroker::new(
            exchange,
            config.aliyun.clone(),
            config.upload.session_duration_secs,
        )?;

        let page_size = config.upload.page_size();
        let ledger = QuotaLedger::new(identities.clone());
        let reconciler = Reconciler::new(store.clone(), ledger.clone(), page_size);
        let (queue, worker) = storage::reconcile_channel(reconciler.clone());

        let gate = Self {
            lister: storage::ObjectLister::new(store.clone(), ledger, queue.clone(), page_size),
            deleter: storage::DeletionCoordinator::new(store.clone(), queue),
            shares: ShareLinkIssuer::new(store, config.upload.share_expiry_secs),
            policies,
            broker,
            reconciler,
            identities,
            config,
        };

        tracing::info!(
            "OSSGate ready for bucket {} in {} ({:?} mode)",
            gate.config.aliyun.bucket,
            gate.config.aliyun.region,
            gate.config.mode
        );

        Ok((gate, worker))
    }

    /// Wire up the broker against the Aliyun STS endpoint
    pub fn with_aliyun_sts(
        config: OssGateConfig,
        identities: Arc<dyn IdentityStore>,
        store: Arc<dyn ObjectStore>,
    ) -> Result<(Self, ReconcileWorker)> {
        let exchange = AliyunStsClient::new(&config.aliyun)
            .map_err(|diagnostic| sts::BrokerError::Unknown { diagnostic })?;
        Self::new(config, identities, store, Arc::new(exchange))
    }

    /// Wire up the broker against Aliyun STS and OSS, sharing one HTTP client
    pub fn with_aliyun(
        config: OssGateConfig,
        identities: Arc<dyn IdentityStore>,
    ) -> Result<(Self, ReconcileWorker)> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| sts::BrokerError::Unknown {
                diagnostic: ProviderDiagnostic::transport(format!("HTTP client setup failed: {}", e)),
            })?;

        let exchange = AliyunStsClient::with_client(http.clone(), &config.aliyun);
        let store = AliyunOssStore::with_client(http, &config.aliyun);
        Self::new(config, identities, Arc::new(store), Arc::new(exchange))
    }

    /// URL signer for the configured bucket, for object stores that sign locally
    pub fn url_signer(config: &OssGateConfig) -> OssUrlSigner {
        OssUrlSigner::from_config(&config.aliyun)
    }

    pub fn config(&self) -> &OssGateConfig {
        &self.config
    }

    /// Issue scoped temporary upload credentials
    pub async fn issue_credentials(&self, user_id: &UserId) -> Result<CredentialGrant> {
        let identity = self.identities.get(user_id).await?;
        self.broker.preflight(&identity)?;

        let policy = self
            .policies
            .generate(user_id, self.config.upload.max_file_size)?;

        let response = self.broker.issue(&identity, &policy).await?;
        let expiration = normalize_expiration(&response.credentials.expiration);

        Ok(CredentialGrant {
            credentials: response.credentials,
            bucket: self.config.aliyun.bucket.clone(),
            region: self.config.aliyun.region.clone(),
            endpoint: self.config.aliyun.endpoint(),
            user_path: identity.namespace(),
            policy,
            expiration,
            request_id: response.request_id,
        })
    }

    /// List one page of the user's objects
    pub async fn list_objects(
        &self,
        user_id: &UserId,
        prefix: Option<&str>,
        page_token: Option<storage::PageToken>,
    ) -> Result<storage::ListingPage> {
        let identity = self.identities.get(user_id).await?;
        Ok(self.lister.list_objects(&identity, prefix, page_token).await?)
    }

    /// Signed, time-limited read URL for one of the user's objects
    pub async fn share_url(
        &self,
        user_id: &UserId,
        key: &str,
        expires_secs: Option<u64>,
    ) -> Result<storage::ShareLink> {
        let identity = self.identities.get(user_id).await?;
        Ok(self.shares.issue(&identity, key, expires_secs).await?)
    }

    /// Delete one object; returns the decoded key
    pub async fn delete_object(&self, user_id: &UserId, key: &str) -> Result<String> {
        let identity = self.identities.get(user_id).await?;
        Ok(self.deleter.delete_one(&identity, key).await?)
    }

    /// Delete several objects, all-or-nothing on authorization
    pub async fn delete_objects(
        &self,
        user_id: &UserId,
        keys: &[String],
    ) -> Result<storage::BatchDeleteReport> {
        let identity = self.identities.get(user_id).await?;
        Ok(self.deleter.delete_batch(&identity, keys).await?)
    }

    /// Recompute the user's usage from a full scan, now
    pub async fn reconcile(&self, user_id: &UserId) -> Result<u64> {
        Ok(self.reconciler.reconcile_user(user_id).await?)
    }

    /// Current quota status
    pub async fn quota(&self, user_id: &UserId) -> Result<QuotaSummary> {
        let identity = self.identities.get(user_id).await?;
        Ok(QuotaLedger::summary(&identity))
    }
}

/// Re-render a provider timestamp as RFC 3339, keeping it as-is if unparseable
fn normalize_expiration(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(at) => at
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        Err(_) => {
            tracing::warn!("Provider returned a non-RFC 3339 expiration: {}", raw);
            raw.to_string()
        }
    }
}
