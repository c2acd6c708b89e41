//! Storage backends for twinstore.
//!
//! Two traits, one per side of the pair:
//!
//! - [`ContentStore`]: content-addressed, assigns identifiers ([`IpfsClient`])
//! - [`ObjectStore`]: keyed put/list/delete ([`S3ObjectStore`])
//!
//! Both have in-memory implementations in [`memory`] for tests.

pub mod content;
pub mod identifier;
pub mod ipfs;
pub mod memory;
pub mod object;
pub mod s3;

pub use content::{ContentStore, ContentStoreError};
pub use identifier::{derive_key, ContentIdentifier, ContentRecord, IdentifierError, ObjectKey};
pub use ipfs::IpfsClient;
pub use memory::{MemoryContentStore, MemoryObjectStore};
pub use object::{ObjectStore, ObjectStoreError};
pub use s3::S3ObjectStore;
