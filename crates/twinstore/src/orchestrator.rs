//! Dual-store orchestrator.
//!
//! Sequences calls to the content store and the object store for create, read
//! and delete. Nothing here is transactional: each operation reports what
//! actually happened on each side, and the HTTP layer renders that.
//!
//! ```text
//! create: add ─► derive_key ─► put ─► [unpin on failure, if enabled]
//! read:   stat ─► (gateway url | cat)
//! delete: unpin ─► repo gc ─► delete object(s)
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use stores::{
    derive_key, ContentIdentifier, ContentRecord, ContentStore, ContentStoreError, ObjectKey,
    ObjectStore, ObjectStoreError,
};
use thiserror::Error;
use twinconf::{ReadMode, TwinConfig};

/// An uploaded file, buffered once and shared by both writes.
#[derive(Debug, Clone)]
pub struct Blob {
    pub data: Bytes,
    pub name: String,
    /// Media-type hint, appended verbatim to the identifier to form the key.
    pub mime: String,
}

/// Both writes landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub record: ContentRecord,
    pub key: ObjectKey,
}

/// What happened to the content-store copy after a failed object write.
#[derive(Debug)]
pub enum Compensation {
    NotAttempted,
    Unpinned,
    Failed(ContentStoreError),
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::NotAttempted => write!(f, "not attempted"),
            Compensation::Unpinned => write!(f, "unpinned"),
            Compensation::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CreateError {
    /// The content store refused or was unreachable. Nothing was written.
    #[error("content store add failed: {0}")]
    ContentStore(#[source] ContentStoreError),

    /// The content store holds the blob but the object store does not.
    #[error("object store write of {key} failed: {source}")]
    ObjectStore {
        record: ContentRecord,
        key: ObjectKey,
        #[source]
        source: ObjectStoreError,
        compensation: Compensation,
    },
}

/// How a read hands the content back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieval {
    /// Public gateway URL for the identifier.
    Url(String),
    /// The bytes themselves, fetched from the content store.
    Inline(Bytes),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieved {
    pub identifier: ContentIdentifier,
    pub size: u64,
    pub retrieval: Retrieval,
}

/// Per-store outcome of a delete that got past the unpin step.
#[derive(Debug)]
pub struct DeleteReport {
    pub identifier: ContentIdentifier,
    /// The identifier was already unpinned before this delete.
    pub already_unpinned: bool,
    pub reclaim: Result<(), ContentStoreError>,
    /// Number of keys removed. An exact-key delete counts as one whether or
    /// not the key existed.
    pub objects: Result<usize, ObjectStoreError>,
}

impl DeleteReport {
    pub fn content_ok(&self) -> bool {
        self.reclaim.is_ok()
    }

    pub fn objects_ok(&self) -> bool {
        self.objects.is_ok()
    }

    pub fn is_complete(&self) -> bool {
        self.content_ok() && self.objects_ok()
    }

    pub fn message(&self) -> String {
        let mut problems = Vec::new();
        if let Err(e) = &self.reclaim {
            problems.push(format!("IPFS garbage collection failed: {e}"));
        }
        if let Err(e) = &self.objects {
            problems.push(format!("S3 delete failed: {e}"));
        }

        if problems.is_empty() && self.already_unpinned {
            "The file has been removed from IPFS node and S3 storage (it was already unpinned)".to_string()
        } else if problems.is_empty() {
            "The file has been removed from IPFS node and S3 storage".to_string()
        } else {
            problems.join("; ")
        }
    }
}

/// Knobs that change orchestrator behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualStoreOptions {
    pub read_mode: ReadMode,
    pub gateway_url: String,
    pub compensate_failed_create: bool,
}

impl Default for DualStoreOptions {
    fn default() -> Self {
        let config = TwinConfig::default();
        Self::from(&config)
    }
}

impl From<&TwinConfig> for DualStoreOptions {
    fn from(config: &TwinConfig) -> Self {
        Self {
            read_mode: config.read.mode,
            gateway_url: config.read.gateway_url.trim_end_matches('/').to_string(),
            compensate_failed_create: config.orchestrator.compensate_failed_create,
        }
    }
}

/// Coordinates one content store and one object store.
pub struct DualStore {
    content: Arc<dyn ContentStore>,
    objects: Arc<dyn ObjectStore>,
    options: DualStoreOptions,
}

impl fmt::Debug for DualStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DualStore").field("options", &self.options).finish_non_exhaustive()
    }
}

impl DualStore {
    pub fn new(content: Arc<dyn ContentStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            content,
            objects,
            options: DualStoreOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DualStoreOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &DualStoreOptions {
        &self.options
    }

    #[tracing::instrument(name = "dual_store.create", skip(self, blob), fields(name = %blob.name, mime = %blob.mime, size = blob.data.len()))]
    pub async fn create(&self, blob: Blob) -> Result<Created, CreateError> {
        let record = self
            .content
            .add(&blob.name, blob.data.clone())
            .await
            .map_err(CreateError::ContentStore)?;

        let key = derive_key(&record.identifier, &blob.mime);
        tracing::debug!(cid = %record.identifier, key = %key, "content stored, writing object");

        match self.objects.put(&key, blob.data).await {
            Ok(()) => {
                tracing::info!(cid = %record.identifier, key = %key, "stored in both back ends");
                Ok(Created { record, key })
            }
            Err(source) => {
                tracing::warn!(cid = %record.identifier, key = %key, error = %source, "object write failed after content add");
                let compensation = self.compensate(&record.identifier).await;
                Err(CreateError::ObjectStore {
                    record,
                    key,
                    source,
                    compensation,
                })
            }
        }
    }

    async fn compensate(&self, id: &ContentIdentifier) -> Compensation {
        if !self.options.compensate_failed_create {
            return Compensation::NotAttempted;
        }

        match self.content.unpin(id).await {
            Ok(()) => {
                tracing::info!(cid = %id, "unpinned orphaned content");
                Compensation::Unpinned
            }
            Err(e) => {
                tracing::error!(cid = %id, error = %e, "could not unpin orphaned content; stores are inconsistent");
                Compensation::Failed(e)
            }
        }
    }

    /// Look up an identifier. Only the content store is consulted.
    #[tracing::instrument(name = "dual_store.read", skip(self), fields(cid = %id))]
    pub async fn read(&self, id: &ContentIdentifier) -> Result<Retrieved, ContentStoreError> {
        let record = self.content.stat(id).await?;

        let retrieval = match self.options.read_mode {
            ReadMode::Url => Retrieval::Url(format!("{}/ipfs/{}", self.options.gateway_url, id)),
            ReadMode::Inline => Retrieval::Inline(self.content.fetch(id).await?),
        };

        Ok(Retrieved {
            identifier: record.identifier,
            size: record.size,
            retrieval,
        })
    }

    /// Remove an identifier from both stores.
    ///
    /// Fails outright only when the unpin could not be issued; after that,
    /// every step runs and the report says which ones failed. With `mime`
    /// the single derived key is deleted, otherwise every key that starts
    /// with the identifier.
    #[tracing::instrument(name = "dual_store.delete", skip(self), fields(cid = %id))]
    pub async fn delete(
        &self,
        id: &ContentIdentifier,
        mime: Option<&str>,
    ) -> Result<DeleteReport, ContentStoreError> {
        let already_unpinned = match self.content.unpin(id).await {
            Ok(()) => false,
            Err(ContentStoreError::NotPinned(_)) => {
                tracing::debug!("identifier was not pinned");
                true
            }
            Err(e) => return Err(e),
        };

        let reclaim = self.content.reclaim_unpinned().await;
        if let Err(e) = &reclaim {
            tracing::warn!(error = %e, "garbage collection failed");
        }

        let objects = match mime {
            Some(mime) => {
                let key = derive_key(id, mime);
                self.objects.delete(&key).await.map(|()| 1)
            }
            None => self.objects.delete_by_identifier(id).await,
        };
        match &objects {
            Ok(count) => tracing::debug!(count, "objects removed"),
            Err(e) => tracing::warn!(error = %e, "object delete failed"),
        }

        Ok(DeleteReport {
            identifier: id.clone(),
            already_unpinned,
            reclaim,
            objects,
        })
    }
}
