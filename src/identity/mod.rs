//! Identity Module - the authenticated account as seen by the broker
//!
//! Account CRUD and authentication live outside this crate. The broker only
//! reads a user's id and quota, and reads/writes the used-storage figure.

mod memory;

pub use memory::MemoryIdentityStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Root under which every user namespace lives
pub const NAMESPACE_ROOT: &str = "users/";

/// Default storage quota for new identities (10 GiB)
pub const DEFAULT_STORAGE_QUOTA: u64 = 10 * 1024 * 1024 * 1024;

const MAX_USER_ID_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("Identity not found: {0}")]
    NotFound(String),

    #[error("Identity store error: {0}")]
    Backend(String),
}

/// Opaque user id, validated so that it can be embedded in a namespace path
///
/// Slashes, wildcards, percent signs, URL query and fragment delimiters,
/// whitespace and control characters are rejected: `users/{id}/` then
/// identifies exactly one user and never nests inside another user's
/// namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();

        if id.is_empty() || id.len() > MAX_USER_ID_LEN {
            return Err(IdentityError::InvalidUserId(format!(
                "length must be 1-{} bytes",
                MAX_USER_ID_LEN
            )));
        }

        if let Some(c) = id
            .chars()
            .find(|c| matches!(c, '/' | '*' | '%' | '?' | '#') || c.is_whitespace() || c.is_control())
        {
            return Err(IdentityError::InvalidUserId(format!(
                "character {:?} is not allowed",
                c
            )));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace prefix owned by this user, always ending in `/`
    pub fn namespace(&self) -> String {
        format!("{}{}/", NAMESPACE_ROOT, self.0)
    }

    /// Check whether a (decoded) object key lives in this user's namespace
    pub fn owns_key(&self, key: &str) -> bool {
        key.strip_prefix(NAMESPACE_ROOT)
            .and_then(|rest| rest.strip_prefix(self.0.as_str()))
            .map_or(false, |rest| rest.starts_with('/'))
    }
}

impl TryFrom<String> for UserId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of an authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,

    /// Storage quota (bytes)
    pub storage_quota: u64,

    /// Last reconciled storage usage (bytes), stale between reconciliations
    pub used_storage: u64,
}

impl Identity {
    pub fn new(user_id: UserId, storage_quota: u64) -> Self {
        Self {
            user_id,
            storage_quota,
            used_storage: 0,
        }
    }

    pub fn with_used_storage(mut self, used_storage: u64) -> Self {
        self.used_storage = used_storage;
        self
    }

    pub fn namespace(&self) -> String {
        self.user_id.namespace()
    }
}

/// Account collaborator: furnishes identities and persists the ledger field
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up an identity by id
    async fn get(&self, user_id: &UserId) -> Result<Identity, IdentityError>;

    /// Overwrite the used-storage figure (last writer wins)
    async fn set_used_storage(&self, user_id: &UserId, used: u64) -> Result<(), IdentityError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_validation() {
        assert!(UserId::new("64f1c2a9e4b0").is_ok());
        assert!(UserId::new("alice@example.com").is_ok());

        assert!(UserId::new("").is_err());
        assert!(UserId::new("a/b").is_err());
        assert!(UserId::new("a*").is_err());
        assert!(UserId::new("a b").is_err());
        assert!(UserId::new("a%2Fb").is_err());
        assert!(UserId::new("a?b").is_err());
        assert!(UserId::new("a#b").is_err());
        assert!(UserId::new("x".repeat(MAX_USER_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_namespace() {
        let id = UserId::new("u123").unwrap();
        assert_eq!(id.namespace(), "users/u123/");
    }

    #[test]
    fn test_owns_key() {
        let id = UserId::new("ab").unwrap();

        assert!(id.owns_key("users/ab/photo.jpg"));
        assert!(id.owns_key("users/ab/2024/01/02/a.txt"));

        // Sibling ids sharing a prefix are not owned
        assert!(!id.owns_key("users/abc/photo.jpg"));
        assert!(!id.owns_key("users/ab"));
        assert!(!id.owns_key("other/ab/photo.jpg"));
    }

    #[test]
    fn test_user_id_serde() {
        let id: UserId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(id.as_str(), "u1");
        assert!(serde_json::from_str::<UserId>("\"a/b\"").is_err());
    }
}
