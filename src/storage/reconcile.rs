//! Background reconciliation
//!
//! Deletions (and listings too large for one page) hand reconciliation off to
//! a worker task over a channel. The worker recomputes usage from a full
//! namespace scan; its failures are logged and never reach the request that
//! triggered them.

use super::{scan_namespace, ObjectStore, QuotaLedger, StorageError};
use crate::identity::UserId;

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Why a reconciliation was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReason {
    Deletion,
    PartialListing,
    Manual,
}

impl fmt::Display for ReconcileReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileReason::Deletion => "deletion",
            ReconcileReason::PartialListing => "partial listing",
            ReconcileReason::Manual => "manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ReconcileJob {
    pub user_id: UserId,
    pub reason: ReconcileReason,
}

/// Recomputes a user's usage from a full listing
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    ledger: QuotaLedger,
    page_size: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, ledger: QuotaLedger, page_size: usize) -> Self {
        Self {
            store,
            ledger,
            page_size,
        }
    }

    pub async fn reconcile_user(&self, user_id: &UserId) -> Result<u64, StorageError> {
        let objects = scan_namespace(self.store.as_ref(), user_id, self.page_size).await?;
        self.ledger
            .reconcile(user_id, objects.iter().map(|o| o.size))
            .await
    }
}

/// Sending half: cheap to clone, never fails the caller
#[derive(Clone)]
pub struct ReconcileQueue {
    tx: mpsc::UnboundedSender<ReconcileJob>,
}

impl ReconcileQueue {
    /// Ask the worker to reconcile a user
    pub fn request(&self, user_id: UserId, reason: ReconcileReason) {
        tracing::debug!("Queueing reconciliation for {} ({})", user_id, reason);

        if let Err(e) = self.tx.send(ReconcileJob { user_id, reason }) {
            tracing::warn!(
                "Reconciliation worker stopped, dropping job for {}",
                e.0.user_id
            );
        }
    }
}

/// Receiving half; runs until every queue handle is dropped
pub struct ReconcileWorker {
    reconciler: Reconciler,
    rx: mpsc::UnboundedReceiver<ReconcileJob>,
}

impl ReconcileWorker {
    /// Run the worker (should be spawned as a task)
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            match self.reconciler.reconcile_user(&job.user_id).await {
                Ok(used) => {
                    tracing::debug!(
                        "Reconciled {} after {}: {} bytes",
                        job.user_id,
                        job.reason,
                        used
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Reconciliation for {} after {} failed: {}",
                        job.user_id,
                        job.reason,
                        e
                    );
                }
            }
        }

        tracing::debug!("Reconciliation worker shutting down");
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// Create a connected queue/worker pair
pub fn reconcile_channel(reconciler: Reconciler) -> (ReconcileQueue, ReconcileWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ReconcileQueue { tx }, ReconcileWorker { reconciler, rx })
}
