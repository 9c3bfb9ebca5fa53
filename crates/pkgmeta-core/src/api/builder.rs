//! Builder for configuring MetadataService initialization.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{DirectoryCacheOptions, DurableDirectoryCache};
use crate::config::{ResolverConfig, ResolverDefaults};
use crate::error::{MetadataError, Result};
use crate::license::{KnownLicenseClassifier, LicenseClassifier};
use crate::model::PackageIdentity;
use crate::network::{HttpClient, HttpFetch};
use crate::resolve::{
    BannedValues, CustomApiSource, FileSystem, GlobalPackagesLayout, InstallPathResolver,
    LocalDescriptorSource, LocalFileSystem, MetadataResolutionPipeline, MetadataSource,
    RegistryPageSource,
};
use crate::sync::{PackageLockManager, SingleFlightCache};
use crate::MetadataService;

/// Builder for configuring MetadataService initialization.
///
/// # Example
///
/// ```rust,ignore
/// use pkgmeta_core::MetadataService;
///
/// let service = MetadataService::builder()
///     .cache_dir("/tmp/pkgmeta")
///     .custom_api_endpoint("https://meta.example/api")
///     .max_parallelism(4)
///     .build()
///     .await?;
/// ```
pub struct MetadataServiceBuilder {
    packages_root: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    registry_base_url: String,
    license_base_url: Option<String>,
    custom_api_endpoint: Option<String>,
    banned_values: HashMap<String, Vec<String>>,
    max_parallelism: Option<usize>,
    identity_lock_timeout: Duration,
    cache_options: DirectoryCacheOptions,
    http: Option<Arc<dyn HttpFetch>>,
    file_system: Option<Arc<dyn FileSystem>>,
    install_paths: Option<Arc<dyn InstallPathResolver>>,
    classifier: Option<Arc<dyn LicenseClassifier>>,
}

impl Default for MetadataServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataServiceBuilder {
    pub fn new() -> Self {
        Self {
            packages_root: None,
            cache_dir: None,
            registry_base_url: ResolverDefaults::REGISTRY_BASE_URL.to_string(),
            license_base_url: Some(ResolverDefaults::LICENSE_BASE_URL.to_string()),
            custom_api_endpoint: None,
            banned_values: HashMap::new(),
            max_parallelism: None,
            identity_lock_timeout: ResolverDefaults::IDENTITY_LOCK_TIMEOUT,
            cache_options: DirectoryCacheOptions::default(),
            http: None,
            file_system: None,
            install_paths: None,
            classifier: None,
        }
    }

    /// Start from an operator configuration file's values.
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            packages_root: config.packages_root.clone(),
            cache_dir: config.cache_dir.clone(),
            registry_base_url: config.registry_base_url.clone(),
            license_base_url: config.license_base_url.clone(),
            custom_api_endpoint: config.custom_api_endpoint.clone(),
            banned_values: config.banned_values.clone(),
            max_parallelism: config.max_parallelism,
            identity_lock_timeout: config.identity_lock_timeout(),
            ..Self::new()
        }
    }

    /// Root of the global packages folder holding installed descriptors.
    ///
    /// Default: `~/.nuget/packages`
    pub fn packages_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.packages_root = Some(root.into());
        self
    }

    /// Directory of the durable record cache.
    ///
    /// Default: the user cache directory under `pkgmeta/metadata`
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn registry_base_url(mut self, url: impl Into<String>) -> Self {
        self.registry_base_url = url.into();
        self
    }

    /// Base for synthesized license URLs; `None` disables them.
    pub fn license_base_url(mut self, url: Option<String>) -> Self {
        self.license_base_url = url;
        self
    }

    /// Enable the custom API tier.
    pub fn custom_api_endpoint(mut self, url: impl Into<String>) -> Self {
        self.custom_api_endpoint = Some(url.into());
        self
    }

    /// Extra placeholder values per property name, added to the defaults.
    pub fn banned_values(mut self, values: HashMap<String, Vec<String>>) -> Self {
        self.banned_values = values;
        self
    }

    /// Bound on concurrent tier chains per identity and on concurrent
    /// identities in `resolve_all`.
    ///
    /// Default: available parallelism
    pub fn max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = Some(n);
        self
    }

    pub fn identity_lock_timeout(mut self, timeout: Duration) -> Self {
        self.identity_lock_timeout = timeout;
        self
    }

    pub fn cache_options(mut self, options: DirectoryCacheOptions) -> Self {
        self.cache_options = options;
        self
    }

    /// Replace the HTTP client used by the remote tiers.
    pub fn http(mut self, http: Arc<dyn HttpFetch>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Replace the packages-folder layout used to find installed packages.
    pub fn install_paths(mut self, paths: Arc<dyn InstallPathResolver>) -> Self {
        self.install_paths = Some(paths);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn LicenseClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    fn check_url(field: &str, value: &str) -> Result<()> {
        url::Url::parse(value).map_err(|e| MetadataError::Config {
            message: format!("{} is not a valid URL ({}): {}", field, value, e),
        })?;
        Ok(())
    }

    /// Build the MetadataService instance.
    ///
    /// Returns once the records already in the cache directory are loaded,
    /// so `cached` sees them immediately.
    pub async fn build(self) -> Result<MetadataService> {
        Self::check_url("registry base URL", &self.registry_base_url)?;
        if let Some(ref url) = self.license_base_url {
            Self::check_url("license base URL", url)?;
        }
        if let Some(ref url) = self.custom_api_endpoint {
            Self::check_url("custom API endpoint", url)?;
        }

        let cache_dir = self
            .cache_dir
            .or_else(ResolverDefaults::cache_dir)
            .ok_or_else(|| MetadataError::Config {
                message: "No cache directory configured and no user cache directory found"
                    .to_string(),
            })?;

        let max_parallelism = self
            .max_parallelism
            .unwrap_or_else(ResolverDefaults::max_parallelism)
            .max(1);

        let http: Arc<dyn HttpFetch> = match self.http {
            Some(http) => http,
            None => Arc::new(HttpClient::new()?),
        };
        let file_system = self
            .file_system
            .unwrap_or_else(|| Arc::new(LocalFileSystem));
        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(KnownLicenseClassifier));
        let install_paths = self.install_paths.or_else(|| {
            self.packages_root
                .map(GlobalPackagesLayout::new)
                .or_else(GlobalPackagesLayout::user_default)
                .map(|layout| Arc::new(layout) as Arc<dyn InstallPathResolver>)
        });

        let mut sources: Vec<Arc<dyn MetadataSource>> = Vec::new();
        match install_paths {
            Some(paths) => sources.push(Arc::new(LocalDescriptorSource::new(
                file_system,
                paths,
                classifier,
            ))),
            None => tracing::warn!("No packages folder found; local descriptor tier disabled"),
        }
        sources.push(Arc::new(RegistryPageSource::new(
            http.clone(),
            self.registry_base_url,
            self.license_base_url,
        )));
        if let Some(endpoint) = self.custom_api_endpoint {
            sources.push(Arc::new(CustomApiSource::new(http, endpoint)));
        }

        let pipeline =
            MetadataResolutionPipeline::new(sources, BannedValues::with_overrides(&self.banned_values))
                .with_max_parallelism(max_parallelism);
        tracing::debug!("Resolution tiers: {:?}", pipeline.source_names());

        let cache = DurableDirectoryCache::open(
            cache_dir,
            |identity: &PackageIdentity| identity.cache_file_stem(),
            self.cache_options,
        )
        .await?;
        cache.wait_initial_load().await;

        Ok(MetadataService {
            pipeline,
            cache,
            records: SingleFlightCache::new(),
            locks: PackageLockManager::with_timeout(self.identity_lock_timeout),
            max_parallelism,
        })
    }
}
