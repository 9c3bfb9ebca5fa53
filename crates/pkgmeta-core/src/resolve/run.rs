//! Per-run state shared by every property task of one resolution.
//!
//! Documents are memoized by key for the lifetime of the run, so each
//! distinct URL or descriptor is loaded at most once no matter how many
//! properties read from it. A failed load is memoized too and reported to
//! every property that asks for it.

use super::descriptor::LocalDescriptor;
use super::registry::RegistryPage;
use crate::cancel::CancellationToken;
use crate::error::{MetadataError, Result};
use crate::model::PackageIdentity;
use crate::sync::SingleFlightCache;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, SemaphorePermit};

type Memo<T> = SingleFlightCache<String, std::result::Result<Option<Arc<T>>, String>>;

pub struct ResolutionRun {
    identity: PackageIdentity,
    cancel: CancellationToken,
    permits: Semaphore,
    documents: Memo<String>,
    pages: Memo<RegistryPage>,
    descriptors: Memo<LocalDescriptor>,
    license_urls: Mutex<HashMap<String, String>>,
}

impl ResolutionRun {
    pub fn new(identity: PackageIdentity, cancel: CancellationToken, parallelism: usize) -> Self {
        Self {
            identity,
            cancel,
            permits: Semaphore::new(parallelism.max(1)),
            documents: Memo::new(),
            pages: Memo::new(),
            descriptors: Memo::new(),
            license_urls: Mutex::new(HashMap::new()),
        }
    }

    pub fn identity(&self) -> &PackageIdentity {
        &self.identity
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Wait for a property slot.
    pub(crate) async fn permit(&self) -> Result<SemaphorePermit<'_>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MetadataError::Cancelled),
            permit = self.permits.acquire() => permit
                .map_err(|_| MetadataError::Other("Resolution permits closed".to_string())),
        }
    }

    /// Raw document at `url`, fetched at most once per run.
    pub async fn document<F, Fut>(&self, url: &str, load: F) -> Result<Option<Arc<String>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>>>,
    {
        memoized(&self.documents, url, &self.cancel, load).await
    }

    pub(crate) async fn page<F, Fut>(&self, url: &str, load: F) -> Result<Option<Arc<RegistryPage>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<RegistryPage>>>,
    {
        memoized(&self.pages, url, &self.cancel, load).await
    }

    pub(crate) async fn descriptor<F, Fut>(&self, load: F) -> Result<Option<Arc<LocalDescriptor>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<LocalDescriptor>>>,
    {
        let key = self.identity.to_string();
        memoized(&self.descriptors, &key, &self.cancel, load).await
    }

    /// Remember the URL resolved for a license so content tiers can use it.
    pub fn record_license_url(&self, name: &str, url: &str) {
        self.license_urls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), url.to_string());
    }

    pub fn license_url(&self, name: &str) -> Option<String> {
        self.license_urls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }
}

async fn memoized<T, F, Fut>(
    memo: &Memo<T>,
    key: &str,
    cancel: &CancellationToken,
    load: F,
) -> Result<Option<Arc<T>>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let outcome = memo
        .get_or_compute_with(
            key.to_string(),
            cancel,
            || async {
                match load().await {
                    Ok(value) => Ok(Ok(value.map(Arc::new))),
                    Err(e) if e.is_fatal() => Err(e),
                    Err(e) => Ok(Err(e.to_string())),
                }
            },
            |_| true,
        )
        .await?;
    outcome.map_err(MetadataError::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn run() -> ResolutionRun {
        ResolutionRun::new(
            PackageIdentity::new("Foo", "1.0.0"),
            CancellationToken::new(),
            2,
        )
    }

    #[tokio::test]
    async fn test_document_loaded_once() {
        let run = run();
        let loads = AtomicUsize::new(0);
        for _ in 0..3 {
            let body = run
                .document("https://example.test/a", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("body".to_string()))
                })
                .await
                .unwrap();
            assert_eq!(body.as_deref().map(String::as_str), Some("body"));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_memoized() {
        let run = run();
        let loads = AtomicUsize::new(0);
        for _ in 0..2 {
            let result = run
                .document("https://example.test/down", || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Err(MetadataError::Network {
                        message: "refused".into(),
                        cause: None,
                    })
                })
                .await;
            assert!(matches!(result, Err(MetadataError::Other(ref m)) if m.contains("refused")));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_license_urls() {
        let run = run();
        assert_eq!(run.license_url("MIT"), None);
        run.record_license_url("MIT", "https://licenses.test/MIT");
        assert_eq!(
            run.license_url("MIT").as_deref(),
            Some("https://licenses.test/MIT")
        );
    }
}
