//! Storage Module - object listing, deletion, share links and quota
//!
//! Everything here talks to the object-storage provider through the
//! `ObjectStore` trait. The provider handle is built once per process and
//! shared by reference.

mod aliyun;
mod deletion;
mod listing;
mod memory;
mod presign;
mod quota;
mod reconcile;

pub use aliyun::{AliyunOssStore, MAX_DELETE_BATCH};
pub use deletion::{authorize_keys, decode_key, DeletionCoordinator};
pub use listing::{classify, scan_namespace, FileKind, ListingPage, ObjectLister, ObjectRecord};
pub use memory::MemoryObjectStore;
pub use presign::{OssUrlSigner, ShareLink, ShareLinkIssuer, MAX_SHARE_EXPIRY_SECS};
pub use quota::{QuotaCheckResult, QuotaLedger, QuotaSummary};
pub use reconcile::{
    reconcile_channel, ReconcileJob, ReconcileQueue, ReconcileReason, ReconcileWorker, Reconciler,
};

use crate::crypto::CryptoError;
use crate::identity::IdentityError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Access denied: {} key(s) outside the caller's namespace", keys.len())]
    Unauthorized { keys: Vec<String> },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("No object keys provided")]
    EmptyBatch,

    #[error("Invalid expiry: {0} seconds")]
    InvalidExpiry(u64),

    #[error("Storage provider error [{code}]: {message}")]
    Provider { code: String, message: String },

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Signing error: {0}")]
    Signing(#[from] CryptoError),
}

/// Provider-reported object metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Continuation token returned by the provider
///
/// Opaque: it is handed back unchanged to resume a listing and is never
/// parsed or rebuilt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageToken(String);

impl PageToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageToken({} bytes)", self.0.len())
    }
}

/// One page request against the provider
#[derive(Debug, Clone)]
pub struct ListRequest {
    pub prefix: String,
    pub page_token: Option<PageToken>,
    pub max_keys: usize,
}

/// One page of provider results
#[derive(Debug, Clone)]
pub struct ListPage {
    pub objects: Vec<ObjectMeta>,
    pub next_token: Option<PageToken>,
    pub truncated: bool,
}

/// A key the provider refused to delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFailure {
    pub key: String,
    pub code: String,
    pub message: String,
}

/// Provider's per-key outcome of a batch delete, surfaced as-is
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<DeleteFailure>,
}

/// Object-storage provider
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List one page of objects under a prefix, in key order
    async fn list(&self, request: &ListRequest) -> Result<ListPage, StorageError>;

    /// Delete one object
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Delete several objects in one provider call
    async fn delete_many(&self, keys: &[String]) -> Result<BatchDeleteReport, StorageError>;

    /// Signed, time-limited GET URL for one object
    async fn presign_get(&self, key: &str, expires_at: DateTime<Utc>) -> Result<String, StorageError>;

    /// Unsigned public URL of an object
    fn object_url(&self, key: &str) -> String;
}
