//! The keyed side: a flat put/list/delete object store.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::identifier::{ContentIdentifier, ObjectKey};

/// Failures talking to the object store.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object store unreachable: {0}")]
    Unreachable(String),

    #[error("object store rejected credentials: {0}")]
    AuthFailure(String),
}

/// Keyed object storage backend.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `data` under `key`, replacing anything already there.
    async fn put(&self, key: &ObjectKey, data: Bytes) -> Result<(), ObjectStoreError>;

    /// Remove `key`. Removing a key that does not exist succeeds.
    async fn delete(&self, key: &ObjectKey) -> Result<(), ObjectStoreError>;

    /// Every key starting with `prefix`, across all listing pages.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<ObjectKey>, ObjectStoreError>;

    /// Remove every object written for `id`, returning how many went.
    ///
    /// Keys are derived as identifier + hint, so the identifier is always a
    /// prefix of them; keys that merely contain it elsewhere are left alone.
    /// A parsed identifier is never a strict prefix of another, so the listing
    /// cannot reach a different identifier's objects.
    async fn delete_by_identifier(&self, id: &ContentIdentifier) -> Result<usize, ObjectStoreError> {
        let keys = self.list_keys(id.as_str()).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        Ok(keys.len())
    }
}
