//! Ownership-checked object deletion

use super::{BatchDeleteReport, ObjectStore, ReconcileQueue, ReconcileReason, StorageError};
use crate::crypto;
use crate::identity::Identity;

use std::sync::Arc;

/// Percent-decode a caller-supplied object key
pub fn decode_key(raw: &str) -> Result<String, StorageError> {
    crypto::percent_decode(raw).map_err(|_| StorageError::InvalidKey(raw.to_string()))
}

/// Decode every key and check it lies inside the caller's namespace
///
/// All-or-nothing: a single foreign or undecodable key rejects the batch,
/// and the error names every offending key as supplied.
pub fn authorize_keys(identity: &Identity, raw_keys: &[String]) -> Result<Vec<String>, StorageError> {
    let mut decoded = Vec::with_capacity(raw_keys.len());
    let mut rejected = Vec::new();

    for raw in raw_keys {
        match decode_key(raw) {
            Ok(key) if identity.user_id.owns_key(&key) => decoded.push(key),
            _ => rejected.push(raw.clone()),
        }
    }

    if !rejected.is_empty() {
        tracing::warn!(
            "User {} attempted to delete {} key(s) outside its namespace",
            identity.user_id,
            rejected.len()
        );
        return Err(StorageError::Unauthorized { keys: rejected });
    }

    Ok(decoded)
}

/// Deletes objects on behalf of a user and schedules reconciliation
#[derive(Clone)]
pub struct DeletionCoordinator {
    store: Arc<dyn ObjectStore>,
    reconciler: ReconcileQueue,
}

impl DeletionCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, reconciler: ReconcileQueue) -> Self {
        Self { store, reconciler }
    }

    /// Delete a single object; returns the decoded key
    pub async fn delete_one(&self, identity: &Identity, raw_key: &str) -> Result<String, StorageError> {
        let key = decode_key(raw_key)?;
        if !identity.user_id.owns_key(&key) {
            tracing::warn!(
                "User {} attempted to delete {} outside its namespace",
                identity.user_id,
                key
            );
            return Err(StorageError::Unauthorized {
                keys: vec![raw_key.to_string()],
            });
        }

        self.store.delete(&key).await?;
        tracing::info!("Deleted {} for {}", key, identity.user_id);

        self.reconciler
            .request(identity.user_id.clone(), ReconcileReason::Deletion);

        Ok(key)
    }

    /// Delete several objects in one provider call
    ///
    /// The provider's per-key report is returned unchanged; failed keys are
    /// not retried.
    pub async fn delete_batch(
        &self,
        identity: &Identity,
        raw_keys: &[String],
    ) -> Result<BatchDeleteReport, StorageError> {
        if raw_keys.is_empty() {
            return Err(StorageError::EmptyBatch);
        }

        let keys = authorize_keys(identity, raw_keys)?;
        let report = self.store.delete_many(&keys).await?;

        tracing::info!(
            "Batch delete for {}: {} deleted, {} failed",
            identity.user_id,
            report.deleted.len(),
            report.failed.len()
        );

        if !report.deleted.is_empty() {
            self.reconciler
                .request(identity.user_id.clone(), ReconcileReason::Deletion);
        }

        Ok(report)
    }
}
