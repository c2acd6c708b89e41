//! In-process stores for tests and local runs without a node or a bucket.
//!
//! Both can be switched offline, and each has one extra fault to inject, so
//! the partial-failure paths of the orchestrator can be driven without a
//! network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::content::{ContentStore, ContentStoreError};
use crate::identifier::{ContentIdentifier, ContentRecord, ObjectKey};
use crate::object::{ObjectStore, ObjectStoreError};

type IdentifierFn = dyn Fn(&[u8]) -> ContentIdentifier + Send + Sync;

#[derive(Debug, Clone)]
struct Pinned {
    data: Bytes,
    pinned: bool,
}

/// Content-addressed store held in a map.
///
/// Identifiers default to a raw-codec CIDv1 over the BLAKE3 digest, so equal
/// bytes always land on the same identifier. Unpinned entries stay readable until
/// [`ContentStore::reclaim_unpinned`] runs, the same as a real node.
pub struct MemoryContentStore {
    blobs: DashMap<ContentIdentifier, Pinned>,
    identify: Arc<IdentifierFn>,
    offline: AtomicBool,
    fail_reclaim: AtomicBool,
}

impl std::fmt::Debug for MemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryContentStore")
            .field("blobs", &self.blobs.len())
            .field("offline", &self.offline.load(Ordering::SeqCst))
            .finish()
    }
}

fn blake3_identifier(data: &[u8]) -> ContentIdentifier {
    ContentIdentifier::raw_blake3(blake3::hash(data).as_bytes())
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::with_identifier_fn(blake3_identifier)
    }

    /// Use a custom identifier function, e.g. to pin test identifiers to
    /// fixed strings.
    pub fn with_identifier_fn<F>(identify: F) -> Self
    where
        F: Fn(&[u8]) -> ContentIdentifier + Send + Sync + 'static,
    {
        Self {
            blobs: DashMap::new(),
            identify: Arc::new(identify),
            offline: AtomicBool::new(false),
            fail_reclaim: AtomicBool::new(false),
        }
    }

    /// Identifier `add` would assign to `data`.
    pub fn identifier_for(&self, data: &[u8]) -> ContentIdentifier {
        (self.identify)(data)
    }

    pub fn contains(&self, id: &ContentIdentifier) -> bool {
        self.blobs.contains_key(id)
    }

    pub fn is_pinned(&self, id: &ContentIdentifier) -> bool {
        self.blobs.get(id).is_some_and(|b| b.pinned)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Every call fails with `Unreachable` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// `reclaim_unpinned` fails with `BadResponse` while set.
    pub fn set_fail_reclaim(&self, fail: bool) {
        self.fail_reclaim.store(fail, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), ContentStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ContentStoreError::Unreachable("memory content store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn add(&self, name: &str, data: Bytes) -> Result<ContentRecord, ContentStoreError> {
        self.check_online()?;
        let id = self.identifier_for(&data);
        let size = data.len() as u64;
        self.blobs.insert(id.clone(), Pinned { data, pinned: true });
        Ok(ContentRecord::new(id, size).with_name(name))
    }

    async fn stat(&self, id: &ContentIdentifier) -> Result<ContentRecord, ContentStoreError> {
        self.check_online()?;
        self.blobs
            .get(id)
            .map(|b| ContentRecord::new(id.clone(), b.data.len() as u64))
            .ok_or_else(|| ContentStoreError::NotFound(id.clone()))
    }

    async fn fetch(&self, id: &ContentIdentifier) -> Result<Bytes, ContentStoreError> {
        self.check_online()?;
        self.blobs
            .get(id)
            .map(|b| b.data.clone())
            .ok_or_else(|| ContentStoreError::NotFound(id.clone()))
    }

    async fn unpin(&self, id: &ContentIdentifier) -> Result<(), ContentStoreError> {
        self.check_online()?;
        match self.blobs.get_mut(id) {
            Some(mut blob) if blob.pinned => {
                blob.pinned = false;
                Ok(())
            }
            _ => Err(ContentStoreError::NotPinned(id.clone())),
        }
    }

    async fn reclaim_unpinned(&self) -> Result<(), ContentStoreError> {
        self.check_online()?;
        if self.fail_reclaim.load(Ordering::SeqCst) {
            return Err(ContentStoreError::BadResponse("garbage collection failed".to_string()));
        }
        self.blobs.retain(|_, b| b.pinned);
        Ok(())
    }
}

/// Object store held in a map.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: DashMap<ObjectKey, Bytes>,
    offline: AtomicBool,
    deny_writes: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.get(&ObjectKey::new(key)).map(|v| v.clone())
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().to_string()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Every call fails with `Unreachable` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// `put` fails with `AuthFailure` while set, as with a read-only key pair.
    pub fn set_deny_writes(&self, deny: bool) {
        self.deny_writes.store(deny, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), ObjectStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ObjectStoreError::Unreachable("memory object store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &ObjectKey, data: Bytes) -> Result<(), ObjectStoreError> {
        self.check_online()?;
        if self.deny_writes.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::AuthFailure("write access denied".to_string()));
        }
        self.objects.insert(key.clone(), data);
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), ObjectStoreError> {
        self.check_online()?;
        self.objects.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<ObjectKey>, ObjectStoreError> {
        self.check_online()?;
        let mut keys: Vec<ObjectKey> = self
            .objects
            .iter()
            .filter(|e| e.key().as_str().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
