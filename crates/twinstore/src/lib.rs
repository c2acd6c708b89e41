//! twinstore keeps each uploaded file in two places: an IPFS node, which names
//! it by content, and an S3 bucket, where it lives under a key derived from
//! that name.

pub mod orchestrator;
pub mod telemetry;
pub mod web;

use std::sync::Arc;

use anyhow::{Context, Result};
use stores::{IpfsClient, S3ObjectStore};
use twinconf::TwinConfig;

pub use orchestrator::{DualStore, DualStoreOptions};

/// Build the orchestrator over the real back ends described by `config`.
pub fn connect(config: &TwinConfig) -> Result<DualStore> {
    let content = IpfsClient::new(&config.content_store).context("Failed to build IPFS client")?;
    let objects = S3ObjectStore::new(&config.object_store);

    tracing::info!(
        ipfs = %content.api_url(),
        bucket = %objects.bucket(),
        region = %config.object_store.region,
        "back ends configured"
    );

    Ok(DualStore::new(Arc::new(content), Arc::new(objects)).with_options(DualStoreOptions::from(config)))
}
