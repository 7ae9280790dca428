//! In-memory object store
//!
//! Key-ordered, with marker-style pagination like OSS: the continuation token
//! is the last key of the previous page. Callers treat it as opaque.

use super::{
    BatchDeleteReport, DeleteFailure, ListPage, ListRequest, ObjectMeta, ObjectStore, OssUrlSigner,
    PageToken, StorageError,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Object store kept in process memory, for tests and local development
#[derive(Debug)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, ObjectMeta>>,
    signer: OssUrlSigner,

    /// Keys the store refuses to delete, reported per key in batch deletes
    protected: RwLock<HashSet<String>>,

    /// Makes every list call fail
    fail_listing: AtomicBool,

    list_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new(signer: OssUrlSigner) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            signer,
            protected: RwLock::new(HashSet::new()),
            fail_listing: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Store (or overwrite) an object of the given size
    pub fn put(&self, key: impl Into<String>, size: u64) {
        self.put_at(key, size, Utc::now());
    }

    pub fn put_at(&self, key: impl Into<String>, size: u64, last_modified: DateTime<Utc>) {
        let key = key.into();
        self.objects.write().insert(
            key.clone(),
            ObjectMeta {
                key,
                size,
                last_modified,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Refuse deletion of `key` with an `AccessDenied` per-key failure
    #[cfg(test)]
    pub(crate) fn protect(&self, key: impl Into<String>) {
        self.protected.write().insert(key.into());
    }

    #[cfg(test)]
    pub(crate) fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Number of list calls served
    #[cfg(test)]
    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of delete calls (single or batch) received
    #[cfg(test)]
    pub(crate) fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn access_denied(key: &str) -> DeleteFailure {
        DeleteFailure {
            key: key.to_string(),
            code: "AccessDenied".to_string(),
            message: "Object is protected".to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, request: &ListRequest) -> Result<ListPage, StorageError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StorageError::Provider {
                code: "ServiceUnavailable".to_string(),
                message: "Listing is unavailable".to_string(),
            });
        }

        let max_keys = request.max_keys.max(1);
        let lower = match &request.page_token {
            Some(token) => Bound::Excluded(token.as_str()),
            None => Bound::Included(request.prefix.as_str()),
        };

        let objects = self.objects.read();
        let mut page: Vec<ObjectMeta> = objects
            .range::<str, _>((lower, Bound::Unbounded))
            .skip_while(|(key, _)| !key.starts_with(&request.prefix))
            .take_while(|(key, _)| key.starts_with(&request.prefix))
            .take(max_keys + 1)
            .map(|(_, meta)| meta.clone())
            .collect();

        let truncated = page.len() > max_keys;
        page.truncate(max_keys);

        let next_token = if truncated {
            page.last().map(|meta| PageToken::new(meta.key.clone()))
        } else {
            None
        };

        Ok(ListPage {
            objects: page,
            next_token,
            truncated,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        if self.protected.read().contains(key) {
            let failure = Self::access_denied(key);
            return Err(StorageError::Provider {
                code: failure.code,
                message: failure.message,
            });
        }

        // Deleting a missing key succeeds, as on OSS
        self.objects.write().remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<BatchDeleteReport, StorageError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let protected = self.protected.read();
        let mut objects = self.objects.write();
        let mut report = BatchDeleteReport::default();

        for key in keys {
            if protected.contains(key) {
                report.failed.push(Self::access_denied(key));
            } else {
                objects.remove(key);
                report.deleted.push(key.clone());
            }
        }

        Ok(report)
    }

    async fn presign_get(&self, key: &str, expires_at: DateTime<Utc>) -> Result<String, StorageError> {
        self.signer.sign_get(key, expires_at)
    }

    fn object_url(&self, key: &str) -> String {
        self.signer.object_url(key)
    }
}
