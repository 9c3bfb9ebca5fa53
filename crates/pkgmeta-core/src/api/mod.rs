//! The metadata service: cache lookup, identity locking, single-flight
//! resolution and persistence in one place.

mod builder;

pub use builder::MetadataServiceBuilder;

use crate::cache::{CacheEvent, DurableDirectoryCache};
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::model::{MetadataRecord, PackageIdentity};
use crate::resolve::MetadataResolutionPipeline;
use crate::sync::{PackageLockManager, SingleFlightCache};
use futures::stream::{self, StreamExt};
use std::path::Path;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Resolves package metadata and keeps it in the durable cache.
///
/// Owns every shared component; nothing is global. Call `shutdown` before
/// dropping to stop the cache workers deterministically.
pub struct MetadataService {
    pub(crate) pipeline: MetadataResolutionPipeline,
    pub(crate) cache: DurableDirectoryCache<PackageIdentity, MetadataRecord>,
    pub(crate) records: SingleFlightCache<PackageIdentity, MetadataRecord>,
    pub(crate) locks: PackageLockManager,
    pub(crate) max_parallelism: usize,
}

impl MetadataService {
    pub fn builder() -> MetadataServiceBuilder {
        MetadataServiceBuilder::new()
    }

    /// Record for `identity`, resolving it if no cached copy exists.
    ///
    /// Fails only on cancellation or when the identity lock cannot be taken
    /// in time. Records that saw tier failures are returned but neither
    /// cached nor persisted, so a later call retries them.
    pub async fn resolve(
        &self,
        identity: &PackageIdentity,
        cancel: &CancellationToken,
    ) -> Result<MetadataRecord> {
        if let Some(record) = self.cache.try_get(identity) {
            debug!("{} served from durable cache", identity);
            return Ok(record);
        }

        let _token = self.locks.acquire_with(identity, cancel).await?;

        self.records
            .get_or_compute_with(
                identity.clone(),
                cancel,
                || async {
                    // Another process may have stored it while we waited
                    if let Some(record) = self.cache.try_get(identity) {
                        return Ok(record);
                    }
                    let record = self.pipeline.resolve(identity, cancel).await?;
                    self.persist(&record);
                    Ok(record)
                },
                MetadataRecord::is_clean,
            )
            .await
    }

    fn persist(&self, record: &MetadataRecord) {
        if !record.is_clean() {
            info!(
                "Not caching {}: {} tier failures",
                record.identity, record.tier_failures
            );
            return;
        }
        if let Err(e) = self.cache.put(&record.identity, record.clone()) {
            warn!("Failed to queue {} for caching: {}", record.identity, e);
        }
    }

    /// Resolve many identities; results come back in input order.
    ///
    /// Different identities resolve concurrently. A failure for one identity
    /// does not affect the others.
    pub async fn resolve_all(
        &self,
        identities: &[PackageIdentity],
        cancel: &CancellationToken,
    ) -> Vec<Result<MetadataRecord>> {
        stream::iter(identities)
            .map(|identity| self.resolve(identity, cancel))
            .buffered(self.max_parallelism)
            .collect()
            .await
    }

    /// Cached record without resolving.
    pub fn cached(&self, identity: &PackageIdentity) -> Option<MetadataRecord> {
        self.cache
            .try_get(identity)
            .or_else(|| self.records.get(identity))
    }

    pub fn cache_dir(&self) -> &Path {
        self.cache.directory()
    }

    pub fn cache_events(&self) -> broadcast::Receiver<CacheEvent> {
        self.cache.subscribe()
    }

    /// Stop the durable cache. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cache.shutdown().await;
    }
}
