//! Integration tests for the MetadataService public interface.
//!
//! The remote tiers run against a hand-written HTTP stub; installed packages
//! and the durable cache live in temporary directories.

use async_trait::async_trait;
use pkgmeta_core::cache::{CacheEvent, DirectoryCacheOptions};
use pkgmeta_core::{
    CancellationToken, HttpFetch, MetadataError, MetadataService, PackageIdentity,
    PackageProperty, Result,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

const REGISTRY: &str = "https://registry.test/packages";

type Responder = Box<dyn Fn(&str) -> Result<Option<String>> + Send + Sync>;

/// Records every request and the peak number of requests in flight.
struct StubHttp {
    respond: Responder,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubHttp {
    fn new(respond: impl Fn(&str) -> Result<Option<String>> + Send + Sync + 'static) -> Arc<Self> {
        Self::with_delay(Duration::from_millis(5), respond)
    }

    fn with_delay(
        delay: Duration,
        respond: impl Fn(&str) -> Result<Option<String>> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            delay,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == url).count()
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpFetch for StubHttp {
    async fn get_text(&self, url: &str, _cancel: &CancellationToken) -> Result<Option<String>> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(url)
    }
}

fn not_found(_url: &str) -> Result<Option<String>> {
    Ok(None)
}

fn fast_cache() -> DirectoryCacheOptions {
    DirectoryCacheOptions {
        reconcile_initial_delay: Duration::from_millis(50),
        reconcile_period: Duration::from_millis(100),
        lock_poll_interval: Duration::from_millis(10),
        lock_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Install a package descriptor the way the global packages folder does.
fn install(packages: &Path, name: &str, version: &str, metadata: &str) {
    let dir = packages
        .join(name.to_lowercase())
        .join(version.to_lowercase());
    std::fs::create_dir_all(&dir).unwrap();
    let xml = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>{name}</id>
    <version>{version}</version>
    {metadata}
  </metadata>
</package>"#
    );
    std::fs::write(dir.join(format!("{}.nuspec", name.to_lowercase())), xml).unwrap();
}

async fn build_service(
    temp_dir: &TempDir,
    http: Arc<StubHttp>,
    custom_api: Option<&str>,
) -> MetadataService {
    let mut builder = MetadataService::builder()
        .packages_root(temp_dir.path().join("packages"))
        .cache_dir(temp_dir.path().join("cache"))
        .registry_base_url(REGISTRY)
        .license_base_url(None)
        .max_parallelism(4)
        .cache_options(fast_cache())
        .http(http);
    if let Some(endpoint) = custom_api {
        builder = builder.custom_api_endpoint(endpoint);
    }
    builder.build().await.unwrap()
}

async fn wait_for_stored(events: &mut broadcast::Receiver<CacheEvent>) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(CacheEvent::Stored(_)) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("cache closed"),
            }
        }
    })
    .await
    .expect("record was never stored");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_descriptor_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    install(
        &temp_dir.path().join("packages"),
        "Foo",
        "1.0.0",
        r#"<authors>Jane Doe</authors>
    <license type="expression">MIT</license>
    <requireLicenseAcceptance>true</requireLicenseAcceptance>"#,
    );
    let http = StubHttp::new(not_found);
    let service = build_service(&temp_dir, http.clone(), None).await;
    let mut events = service.cache_events();
    let identity = PackageIdentity::new("Foo", "1.0.0");

    let record = service
        .resolve(&identity, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.license_names(), vec!["MIT"]);
    assert_eq!(record.license("MIT").unwrap().url, None);
    assert_eq!(record.text(PackageProperty::Authors), Some("Jane Doe"));
    assert_eq!(record.flag(PackageProperty::RequireLicenseAcceptance), Some(true));
    assert_eq!(record.text(PackageProperty::Title), None);
    assert!(record.is_clean());

    // Clean records are persisted; later calls do no network work
    wait_for_stored(&mut events).await;
    assert!(service.cache_dir().join("foo.1.0.0.json").exists());
    let before = http.calls().len();
    let again = service
        .resolve(&identity, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.text(PackageProperty::Authors), Some("Jane Doe"));
    assert_eq!(http.calls().len(), before);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reopened_service_serves_persisted_records_at_once() {
    let temp_dir = TempDir::new().unwrap();
    install(
        &temp_dir.path().join("packages"),
        "Foo",
        "1.0.0",
        r#"<authors>Jane Doe</authors>"#,
    );
    let identity = PackageIdentity::new("Foo", "1.0.0");
    {
        let service = build_service(&temp_dir, StubHttp::new(not_found), None).await;
        let mut events = service.cache_events();
        service
            .resolve(&identity, &CancellationToken::new())
            .await
            .unwrap();
        wait_for_stored(&mut events).await;
        service.shutdown().await;
    }

    let http = StubHttp::new(not_found);
    let service = build_service(&temp_dir, http.clone(), None).await;
    let cached = service.cached(&identity).expect("persisted record not loaded");
    assert_eq!(cached.text(PackageProperty::Authors), Some("Jane Doe"));

    let record = service
        .resolve(&identity, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(record, cached);
    assert!(http.calls().is_empty());

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_banned_local_value_falls_through_to_registry() {
    let temp_dir = TempDir::new().unwrap();
    install(
        &temp_dir.path().join("packages"),
        "Foo",
        "1.0.0",
        "<description>Package description</description>",
    );
    let page_url = format!("{}/Foo/1.0.0", REGISTRY);
    let page = page_url.clone();
    let http = StubHttp::new(move |url| {
        Ok((url == page).then(|| {
            r#"<div id="package-description">sentinel</div>"#.to_string()
        }))
    });
    let service = build_service(&temp_dir, http, None).await;

    let record = service
        .resolve(&PackageIdentity::new("Foo", "1.0.0"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(record.text(PackageProperty::Description), Some("sentinel"));

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_fetch_per_url_per_run() {
    let temp_dir = TempDir::new().unwrap();
    let page_url = format!("{}/Bar/2.0.0", REGISTRY);
    let license_url = "https://licenses.test/Apache-2.0".to_string();
    let (page, license) = (page_url.clone(), license_url.clone());
    let http = StubHttp::new(move |url| {
        if url == page {
            Ok(Some(format!(
                r#"<h1 id="package-title">Bar</h1>
                   <span id="package-authors">Acme</span>
                   <span id="package-owners">Acme</span>
                   <div id="package-description">Bars things.</div>
                   <ul id="package-tags"><li class="tag">bar</li></ul>
                   <span id="license-expression">Apache-2.0</span>
                   <a data-license="Apache-2.0" href="{}">license</a>"#,
                license
            )))
        } else if url == license {
            Ok(Some("<pre>Apache License, Version 2.0</pre>".to_string()))
        } else {
            Ok(None)
        }
    });
    let service = build_service(&temp_dir, http.clone(), None).await;

    let record = service
        .resolve(&PackageIdentity::new("Bar", "2.0.0"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.text(PackageProperty::Title), Some("Bar"));
    assert_eq!(record.text(PackageProperty::Tags), Some("bar"));
    let apache = record.license("Apache-2.0").unwrap();
    assert_eq!(apache.url.as_deref(), Some(license_url.as_str()));
    assert_eq!(apache.content.as_deref(), Some("Apache License, Version 2.0"));

    assert_eq!(http.calls_to(&page_url), 1);
    assert_eq!(http.calls_to(&license_url), 1);
    assert_eq!(http.calls().len(), 2);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_identity_never_fetches_concurrently() {
    let temp_dir = TempDir::new().unwrap();
    let http = StubHttp::with_delay(Duration::from_millis(100), |url| {
        Ok(url
            .ends_with("/Foo/1.0.0")
            .then(|| r#"<span id="package-authors">Acme</span>"#.to_string()))
    });
    let service = Arc::new(build_service(&temp_dir, http.clone(), None).await);
    let identity = PackageIdentity::new("Foo", "1.0.0");

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let service = service.clone();
            let identity = identity.clone();
            tokio::spawn(async move {
                service
                    .resolve(&identity, &CancellationToken::new())
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        let record = task.await.unwrap();
        assert_eq!(record.text(PackageProperty::Authors), Some("Acme"));
    }

    assert_eq!(http.max_in_flight(), 1);
    assert_eq!(http.calls_to(&format!("{}/Foo/1.0.0", REGISTRY)), 1);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_identities_resolve_in_parallel() {
    let temp_dir = TempDir::new().unwrap();
    let http = StubHttp::with_delay(Duration::from_millis(100), not_found);
    let service = build_service(&temp_dir, http.clone(), None).await;
    let identities = vec![
        PackageIdentity::new("Alpha", "1.0.0"),
        PackageIdentity::new("Beta", "1.0.0"),
        PackageIdentity::new("Gamma", "1.0.0"),
    ];

    let results = service
        .resolve_all(&identities, &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 3);
    for (result, identity) in results.iter().zip(&identities) {
        assert_eq!(&result.as_ref().unwrap().identity, identity);
    }
    assert!(http.max_in_flight() >= 2);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_records_with_tier_failures_are_not_cached() {
    let temp_dir = TempDir::new().unwrap();
    let http = StubHttp::new(|url| {
        Err(MetadataError::Network {
            message: format!("connection refused: {}", url),
            cause: None,
        })
    });
    let service = build_service(&temp_dir, http.clone(), None).await;
    let identity = PackageIdentity::new("Flaky", "0.1.0");

    let first = service
        .resolve(&identity, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!first.is_clean());
    assert!(first.is_empty());
    // The failed page load is shared by every property in the run
    assert_eq!(http.calls().len(), 1);

    service
        .resolve(&identity, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(http.calls().len(), 2);
    assert!(service.cached(&identity).is_none());
    assert!(!service.cache_dir().join("flaky.0.1.0.json").exists());

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_custom_api_is_the_last_tier() {
    let temp_dir = TempDir::new().unwrap();
    let http = StubHttp::new(|url| {
        if !url.starts_with("https://api.test/meta?") {
            return Ok(None);
        }
        let answer = if url.contains("propertyName=Authors") {
            "API Author"
        } else if url.contains("propertyName=LicenseNames") {
            r#"["BSD-3-Clause"]"#
        } else if url.contains("propertyName=LicenseUrl") && url.contains("licenseName=BSD-3-Clause")
        {
            "https://licenses.test/BSD-3-Clause"
        } else if url.contains("propertyName=RequireLicenseAcceptance") {
            "no"
        } else {
            "   "
        };
        Ok(Some(answer.to_string()))
    });
    let service = build_service(&temp_dir, http, Some("https://api.test/meta")).await;

    let record = service
        .resolve(&PackageIdentity::new("Internal", "3.1.4"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.text(PackageProperty::Authors), Some("API Author"));
    assert_eq!(record.flag(PackageProperty::RequireLicenseAcceptance), Some(false));
    assert_eq!(record.text(PackageProperty::Title), None);
    assert_eq!(record.license_names(), vec!["BSD-3-Clause"]);
    let bsd = record.license("BSD-3-Clause").unwrap();
    assert_eq!(bsd.url.as_deref(), Some("https://licenses.test/BSD-3-Clause"));
    assert_eq!(bsd.content, None);

    service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_resolve_fails_fast() {
    let temp_dir = TempDir::new().unwrap();
    let service = build_service(&temp_dir, StubHttp::new(not_found), None).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = service
        .resolve(&PackageIdentity::new("Foo", "1.0.0"), &cancel)
        .await;
    assert!(matches!(result, Err(MetadataError::Cancelled)));

    service.shutdown().await;
}
