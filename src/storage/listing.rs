//! Listing & Classification
//!
//! Paginated enumeration of one user's objects, with a coarse file kind
//! inferred from the extension. Listings feed the quota ledger.

use super::{
    ListRequest, ObjectMeta, ObjectStore, PageToken, QuotaLedger, ReconcileQueue, ReconcileReason,
    StorageError,
};
use crate::config::MAX_PAGE_SIZE;
use crate::identity::{Identity, UserId};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Coarse file category shown to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Video,
    Audio,
    Document,
    Archive,
    Text,
    Word,
    Excel,
    Powerpoint,
    Other,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Image => "image",
            FileKind::Video => "video",
            FileKind::Audio => "audio",
            FileKind::Document => "document",
            FileKind::Archive => "archive",
            FileKind::Text => "text",
            FileKind::Word => "word",
            FileKind::Excel => "excel",
            FileKind::Powerpoint => "powerpoint",
            FileKind::Other => "other",
        }
    }
}

static EXTENSIONS: Lazy<HashMap<&'static str, FileKind>> = Lazy::new(|| {
    use FileKind::*;

    [
        ("jpg", Image),
        ("jpeg", Image),
        ("png", Image),
        ("gif", Image),
        ("bmp", Image),
        ("webp", Image),
        ("mp4", Video),
        ("avi", Video),
        ("mov", Video),
        ("wmv", Video),
        ("flv", Video),
        ("mp3", Audio),
        ("wav", Audio),
        ("aac", Audio),
        ("pdf", Document),
        ("zip", Archive),
        ("rar", Archive),
        ("7z", Archive),
        ("txt", Text),
        ("md", Text),
        ("doc", Word),
        ("docx", Word),
        ("xls", Excel),
        ("xlsx", Excel),
        ("ppt", Powerpoint),
        ("pptx", Powerpoint),
    ]
    .into_iter()
    .collect()
});

/// Infer the file kind from the extension of the last path segment
pub fn classify(filename: &str) -> FileKind {
    let name = filename.rsplit('/').next().unwrap_or(filename);

    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .and_then(|ext| EXTENSIONS.get(ext.as_str()).copied())
        .unwrap_or(FileKind::Other)
}

/// One object as presented to its owner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    pub key: String,

    /// Key relative to the owner's namespace
    pub name: String,

    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub kind: FileKind,

    /// MIME type guessed from the name
    pub content_type: String,

    /// Unsigned public URL
    pub url: String,
}

impl ObjectRecord {
    fn from_meta(meta: ObjectMeta, namespace: &str, url: String) -> Self {
        let name = meta
            .key
            .strip_prefix(namespace)
            .unwrap_or(&meta.key)
            .to_string();
        let content_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .to_string();

        Self {
            kind: classify(&meta.key),
            key: meta.key,
            name,
            size: meta.size,
            last_modified: meta.last_modified,
            content_type,
            url,
        }
    }
}

/// One page of a user's listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    pub records: Vec<ObjectRecord>,
    pub next_page_token: Option<PageToken>,
    pub truncated: bool,

    /// Sum of sizes in this page
    pub total_bytes: u64,

    pub storage_quota: u64,
}

/// Walk every page under the user's namespace
pub async fn scan_namespace(
    store: &dyn ObjectStore,
    user_id: &UserId,
    page_size: usize,
) -> Result<Vec<ObjectMeta>, StorageError> {
    let mut request = ListRequest {
        prefix: user_id.namespace(),
        page_token: None,
        max_keys: page_size.clamp(1, MAX_PAGE_SIZE),
    };
    let mut objects = Vec::new();

    loop {
        let page = store.list(&request).await?;
        objects.extend(page.objects);

        if !page.truncated {
            break;
        }

        match page.next_token {
            // A provider echoing the same token would loop forever
            Some(token) if request.page_token.as_ref() == Some(&token) => {
                return Err(StorageError::Provider {
                    code: "RepeatedToken".to_string(),
                    message: "Listing did not advance".to_string(),
                });
            }
            Some(token) => request.page_token = Some(token),
            None => {
                return Err(StorageError::Provider {
                    code: "MissingToken".to_string(),
                    message: "Truncated listing returned no continuation token".to_string(),
                });
            }
        }
    }

    Ok(objects)
}

/// Lists a user's objects and keeps the ledger in step
#[derive(Clone)]
pub struct ObjectLister {
    store: Arc<dyn ObjectStore>,
    ledger: QuotaLedger,
    reconciler: ReconcileQueue,
    page_size: usize,
}

impl ObjectLister {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: QuotaLedger,
        reconciler: ReconcileQueue,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            ledger,
            reconciler,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// List one page under the user's namespace, optionally narrowed by a
    /// sub-prefix, resuming from an opaque page token
    pub async fn list_objects(
        &self,
        identity: &Identity,
        prefix: Option<&str>,
        page_token: Option<PageToken>,
    ) -> Result<ListingPage, StorageError> {
        let namespace = identity.namespace();
        let sub_prefix = prefix.unwrap_or("");
        let whole_namespace = sub_prefix.is_empty() && page_token.is_none();

        let request = ListRequest {
            prefix: format!("{}{}", namespace, sub_prefix),
            page_token,
            max_keys: self.page_size,
        };

        let page = self.store.list(&request).await?;

        let total_bytes = page
            .objects
            .iter()
            .fold(0u64, |acc, o| acc.saturating_add(o.size));

        tracing::debug!(
            "Listed {} objects ({} bytes) for {}, truncated: {}",
            page.objects.len(),
            total_bytes,
            identity.user_id,
            page.truncated
        );

        if whole_namespace && !page.truncated {
            // This page is the complete namespace
            if let Err(e) = self
                .ledger
                .reconcile(&identity.user_id, page.objects.iter().map(|o| o.size))
                .await
            {
                tracing::warn!("Failed to update storage usage for {}: {}", identity.user_id, e);
            }
        } else if whole_namespace {
            self.reconciler
                .request(identity.user_id.clone(), ReconcileReason::PartialListing);
        }

        let records = page
            .objects
            .into_iter()
            .map(|meta| {
                let url = self.store.object_url(&meta.key);
                ObjectRecord::from_meta(meta, &namespace, url)
            })
            .collect();

        Ok(ListingPage {
            records,
            next_page_token: page.next_token,
            truncated: page.truncated,
            total_bytes,
            storage_quota: identity.storage_quota,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityStore, MemoryIdentityStore};
    use crate::storage::{
        reconcile_channel, BatchDeleteReport, ListPage, MemoryObjectStore, OssUrlSigner,
        ReconcileWorker, Reconciler,
    };
    use async_trait::async_trait;
    use std::collections::HashSet;

    #[test]
    fn test_classify() {
        assert_eq!(classify("Photo.JPG"), FileKind::Image);
        assert_eq!(classify("README"), FileKind::Other);
        assert_eq!(classify("users/u1/2024/clip.Mp4"), FileKind::Video);
        assert_eq!(classify("song.mp3"), FileKind::Audio);
        assert_eq!(classify("report.pdf"), FileKind::Document);
        assert_eq!(classify("backup.tar.7z"), FileKind::Archive);
        assert_eq!(classify("notes.md"), FileKind::Text);
        assert_eq!(classify("cv.DOCX"), FileKind::Word);
        assert_eq!(classify("budget.xls"), FileKind::Excel);
        assert_eq!(classify("deck.pptx"), FileKind::Powerpoint);
        assert_eq!(classify("binary.exe"), FileKind::Other);
        assert_eq!(classify("trailing."), FileKind::Other);
        assert_eq!(classify("dir.jpg/README"), FileKind::Other);
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(serde_json::to_string(&FileKind::Powerpoint).unwrap(), "\"powerpoint\"");
        assert_eq!(FileKind::Image.as_str(), "image");
    }

    struct Fixture {
        identities: Arc<MemoryIdentityStore>,
        store: Arc<MemoryObjectStore>,
        lister: ObjectLister,
        identity: Identity,
        worker: Option<ReconcileWorker>,
    }

    fn fixture(page_size: usize) -> Fixture {
        let identities = Arc::new(MemoryIdentityStore::new());
        let identity = Identity::new(UserId::new("u1").unwrap(), 1_000_000);
        identities.insert(identity.clone());

        let store = Arc::new(MemoryObjectStore::new(OssUrlSigner::new("b", "e", "id", "s")));
        let ledger = QuotaLedger::new(identities.clone());
        let reconciler = Reconciler::new(store.clone(), ledger.clone(), page_size);
        let (queue, worker) = reconcile_channel(reconciler);
        let lister = ObjectLister::new(store.clone(), ledger, queue, page_size);

        Fixture {
            identities,
            store,
            lister,
            identity,
            worker: Some(worker),
        }
    }

    /// Store whose every page claims more results but carries no token
    struct TokenlessStore;

    #[async_trait]
    impl ObjectStore for TokenlessStore {
        async fn list(&self, _request: &ListRequest) -> Result<ListPage, StorageError> {
            Ok(ListPage {
                objects: Vec::new(),
                next_token: None,
                truncated: true,
            })
        }

        async fn delete(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }

        async fn delete_many(&self, _keys: &[String]) -> Result<BatchDeleteReport, StorageError> {
            Ok(BatchDeleteReport::default())
        }

        async fn presign_get(&self, key: &str, _expires_at: DateTime<Utc>) -> Result<String, StorageError> {
            Ok(key.to_string())
        }

        fn object_url(&self, key: &str) -> String {
            key.to_string()
        }
    }

    #[tokio::test]
    async fn test_pagination_no_gaps_or_duplicates() {
        let fx = fixture(100);
        for i in 0..150 {
            fx.store.put(format!("users/u1/file-{:03}.bin", i), 10);
        }
        fx.store.put("users/u10/other.bin", 10);

        let first = fx.lister.list_objects(&fx.identity, None, None).await.unwrap();
        assert_eq!(first.records.len(), 100);
        assert!(first.truncated);
        let token = first.next_page_token.clone().expect("continuation token");

        let second = fx
            .lister
            .list_objects(&fx.identity, None, Some(token))
            .await
            .unwrap();
        assert_eq!(second.records.len(), 50);
        assert!(!second.truncated);
        assert!(second.next_page_token.is_none());

        let keys: HashSet<String> = first
            .records
            .iter()
            .chain(second.records.iter())
            .map(|r| r.key.clone())
            .collect();
        assert_eq!(keys.len(), 150);
        assert!(keys.iter().all(|k| k.starts_with("users/u1/")));
    }

    #[tokio::test]
    async fn test_complete_listing_reconciles_inline() {
        let fx = fixture(100);
        fx.store.put("users/u1/a.jpg", 300);
        fx.store.put("users/u1/b.txt", 200);

        let page = fx.lister.list_objects(&fx.identity, None, None).await.unwrap();

        assert_eq!(page.total_bytes, 500);
        assert_eq!(page.storage_quota, 1_000_000);
        assert_eq!(
            fx.identities.get(&fx.identity.user_id).await.unwrap().used_storage,
            500
        );
    }

    #[tokio::test]
    async fn test_sub_prefix_listing_leaves_ledger() {
        let fx = fixture(100);
        fx.store.put("users/u1/photos/a.jpg", 300);
        fx.store.put("users/u1/docs/b.txt", 200);

        let page = fx
            .lister
            .list_objects(&fx.identity, Some("photos/"), None)
            .await
            .unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].name, "photos/a.jpg");
        assert_eq!(page.records[0].kind, FileKind::Image);
        assert_eq!(page.records[0].content_type, "image/jpeg");
        assert_eq!(page.records[0].url, "https://b.e/users/u1/photos/a.jpg");
        assert_eq!(
            fx.identities.get(&fx.identity.user_id).await.unwrap().used_storage,
            0
        );
    }

    #[tokio::test]
    async fn test_scan_namespace_walks_all_pages() {
        let fx = fixture(100);
        for i in 0..250 {
            fx.store.put(format!("users/u1/{:04}", i), 1);
        }

        let objects = scan_namespace(fx.store.as_ref(), &fx.identity.user_id, 100)
            .await
            .unwrap();

        assert_eq!(objects.len(), 250);
        assert_eq!(fx.store.list_calls(), 3);
    }

    #[tokio::test]
    async fn test_scan_namespace_requires_token() {
        let user_id = UserId::new("u1").unwrap();
        match scan_namespace(&TokenlessStore, &user_id, 100).await {
            Err(StorageError::Provider { code, .. }) => assert_eq!(code, "MissingToken"),
            other => panic!("expected missing token error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_listing_reconciles_in_background() {
        let mut fx = fixture(100);
        for i in 0..150 {
            fx.store.put(format!("users/u1/file-{:03}.bin", i), 10);
        }

        let page = fx.lister.list_objects(&fx.identity, None, None).await.unwrap();
        assert!(page.truncated);
        assert_eq!(page.total_bytes, 1000);

        // Dropping the lister closes the queue so the worker drains and exits
        let worker = fx.worker.take().unwrap().spawn();
        drop(fx.lister);
        worker.await.unwrap();

        assert_eq!(
            fx.identities.get(&fx.identity.user_id).await.unwrap().used_storage,
            1500
        );
    }
}
