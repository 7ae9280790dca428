//! Quota Ledger
//!
//! Keeps the per-user used-storage figure and gates credential issuance.
//! The figure is advisory: uploads made with previously issued credentials
//! only show up after the next reconciliation, so usage can transiently
//! exceed the quota. Reconciliations for the same user may race; the last
//! writer wins.

use super::StorageError;
use crate::identity::{Identity, IdentityStore, UserId};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCheckResult {
    Allowed,
    Exceeded { used: u64, quota: u64 },
}

impl QuotaCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaCheckResult::Allowed)
    }
}

/// User quota summary for responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSummary {
    pub bytes_used: u64,
    pub bytes_quota: u64,
    pub bytes_available: u64,
    pub usage_percentage: f64,
}

/// Ledger over the identity store's used-storage field
#[derive(Clone)]
pub struct QuotaLedger {
    identities: Arc<dyn IdentityStore>,
}

impl QuotaLedger {
    pub fn new(identities: Arc<dyn IdentityStore>) -> Self {
        Self { identities }
    }

    /// Gate check: allowed only while `used < quota`
    pub fn check_quota(identity: &Identity) -> QuotaCheckResult {
        if identity.used_storage < identity.storage_quota {
            QuotaCheckResult::Allowed
        } else {
            QuotaCheckResult::Exceeded {
                used: identity.used_storage,
                quota: identity.storage_quota,
            }
        }
    }

    /// Quota status of an identity
    pub fn summary(identity: &Identity) -> QuotaSummary {
        let usage_percentage = if identity.storage_quota == 0 {
            100.0
        } else {
            (identity.used_storage as f64 / identity.storage_quota as f64 * 100.0).min(100.0)
        };

        QuotaSummary {
            bytes_used: identity.used_storage,
            bytes_quota: identity.storage_quota,
            bytes_available: identity.storage_quota.saturating_sub(identity.used_storage),
            usage_percentage,
        }
    }

    /// Replace the stored figure with the sum of `sizes`
    ///
    /// Writes only when the value changed. Returns the new figure.
    pub async fn reconcile<I>(&self, user_id: &UserId, sizes: I) -> Result<u64, StorageError>
    where
        I: IntoIterator<Item = u64>,
    {
        let total = sizes
            .into_iter()
            .fold(0u64, |acc, size| acc.saturating_add(size));

        let current = self.identities.get(user_id).await?.used_storage;

        if current != total {
            self.identities.set_used_storage(user_id, total).await?;
            tracing::info!(
                "Reconciled storage for {}: {} -> {} bytes",
                user_id,
                current,
                total
            );
        } else {
            tracing::debug!("Storage for {} unchanged at {} bytes", user_id, total);
        }

        Ok(total)
    }
}
