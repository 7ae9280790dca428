//! In-memory identity store

use super::{Identity, IdentityError, IdentityStore, UserId};

use async_trait::async_trait;
use dashmap::DashMap;

/// Identity store kept in process memory, for tests and local development
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identities: DashMap<UserId, Identity>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an identity
    pub fn insert(&self, identity: Identity) {
        self.identities.insert(identity.user_id.clone(), identity);
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn get(&self, user_id: &UserId) -> Result<Identity, IdentityError> {
        self.identities
            .get(user_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| IdentityError::NotFound(user_id.to_string()))
    }

    async fn set_used_storage(&self, user_id: &UserId, used: u64) -> Result<(), IdentityError> {
        let mut entry = self
            .identities
            .get_mut(user_id)
            .ok_or_else(|| IdentityError::NotFound(user_id.to_string()))?;
        entry.used_storage = used;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_and_update() {
        let store = MemoryIdentityStore::new();
        let id = UserId::new("u1").unwrap();
        store.insert(Identity::new(id.clone(), 1000));

        assert_eq!(store.get(&id).await.unwrap().used_storage, 0);

        store.set_used_storage(&id, 250).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().used_storage, 250);
    }

    #[tokio::test]
    async fn test_unknown_identity() {
        let store = MemoryIdentityStore::new();
        let id = UserId::new("ghost").unwrap();

        assert!(matches!(store.get(&id).await, Err(IdentityError::NotFound(_))));
        assert!(store.set_used_storage(&id, 1).await.is_err());
    }
}
