//! Per-package-identity mutual exclusion for resolution work.
//!
//! Single-flight collapses requests for a whole record, but once a record is
//! split into many per-property sub-operations nothing else stops two
//! resolutions of the same identity from fetching the same pages. Holding an
//! identity lock for the whole run closes that gap.

use super::keyed::{KeyedGuard, KeyedLocks};
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::model::PackageIdentity;
use std::time::Duration;
use tracing::debug;

/// Scoped ownership of one package identity.
pub struct PackageLockToken {
    identity: PackageIdentity,
    _guard: KeyedGuard<PackageIdentity>,
}

impl PackageLockToken {
    pub fn identity(&self) -> &PackageIdentity {
        &self.identity
    }

    /// Release explicitly; dropping the token does the same.
    pub fn release(self) {
        debug!("Released identity lock for {}", self.identity);
    }
}

/// Map of identity -> semaphore, entries removed when idle.
#[derive(Default)]
pub struct PackageLockManager {
    locks: KeyedLocks<PackageIdentity>,
    timeout: Option<Duration>,
}

impl PackageLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every wait; exceeding it fails that caller with `LockTimeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            locks: KeyedLocks::new(),
            timeout: Some(timeout),
        }
    }

    pub async fn acquire(&self, identity: &PackageIdentity) -> Result<PackageLockToken> {
        self.acquire_with(identity, &CancellationToken::new()).await
    }

    pub async fn acquire_with(
        &self,
        identity: &PackageIdentity,
        cancel: &CancellationToken,
    ) -> Result<PackageLockToken> {
        let guard = self
            .locks
            .acquire(identity.clone(), cancel, self.timeout)
            .await?;
        debug!("Acquired identity lock for {}", identity);
        Ok(PackageLockToken {
            identity: identity.clone(),
            _guard: guard,
        })
    }

    /// Identities currently locked or waited on.
    pub fn active_keys(&self) -> Vec<PackageIdentity> {
        self.locks.keys()
    }
}
