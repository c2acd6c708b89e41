//! The content-addressed side: a store that names blobs by their content.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::identifier::{ContentIdentifier, ContentRecord};

/// Failures talking to the content store.
#[derive(Debug, Error)]
pub enum ContentStoreError {
    /// Could not reach the store, or it gave up before answering.
    #[error("content store unreachable: {0}")]
    Unreachable(String),

    /// The store answered with something we could not use.
    #[error("content store returned an unexpected response: {0}")]
    BadResponse(String),

    #[error("content not found: {0}")]
    NotFound(ContentIdentifier),

    #[error("content not pinned: {0}")]
    NotPinned(ContentIdentifier),
}

/// Content-addressed storage backend.
///
/// The store assigns identifiers; callers only ever echo them back.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store and pin `data`, returning the identifier the store assigned.
    ///
    /// `name` is passed through to the store, not interpreted.
    async fn add(&self, name: &str, data: Bytes) -> Result<ContentRecord, ContentStoreError>;

    /// Look up an identifier. The returned record has no name.
    async fn stat(&self, id: &ContentIdentifier) -> Result<ContentRecord, ContentStoreError>;

    /// Read the raw bytes behind an identifier.
    async fn fetch(&self, id: &ContentIdentifier) -> Result<Bytes, ContentStoreError>;

    /// Make an identifier eligible for garbage collection.
    async fn unpin(&self, id: &ContentIdentifier) -> Result<(), ContentStoreError>;

    /// Garbage-collect everything that is no longer pinned.
    async fn reclaim_unpinned(&self) -> Result<(), ContentStoreError>;
}
