//! Centralized configuration for the metadata engine.
//!
//! Constant groups hold timing and naming defaults. `ResolverConfig` is the
//! operator-facing JSON configuration file.

use crate::error::{MetadataError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Durable directory cache timing and naming.
pub struct CacheConfig;

impl CacheConfig {
    pub const RECORD_EXTENSION: &'static str = "json";
    pub const LOCK_DIR_NAME: &'static str = ".locks";
    pub const LOCK_EXTENSION: &'static str = "lock";
    /// Longest lock file stem before it is shortened with a digest.
    pub const MAX_LOCK_NAME_LEN: usize = 200;
    pub const RECONCILE_INITIAL_DELAY: Duration = Duration::from_secs(1);
    pub const RECONCILE_PERIOD: Duration = Duration::from_secs(3);
    pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const LOCK_TIMEOUT: Duration = Duration::from_secs(120);
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const USER_AGENT: &'static str = "pkgmeta/0.3";
}

/// Resolution defaults.
pub struct ResolverDefaults;

impl ResolverDefaults {
    pub const REGISTRY_BASE_URL: &'static str = "https://www.nuget.org/packages";
    pub const LICENSE_BASE_URL: &'static str = "https://licenses.nuget.org";
    pub const IDENTITY_LOCK_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DESCRIPTOR_EXTENSION: &'static str = "nuspec";
    pub const CACHE_DIR_NAME: &'static str = "pkgmeta";
    pub const METADATA_DIR_NAME: &'static str = "metadata";

    /// Default local install root (`~/.nuget/packages`).
    pub fn packages_root() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".nuget").join("packages"))
    }

    /// Default durable cache directory (`<cache dir>/pkgmeta/metadata`).
    pub fn cache_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| {
            dir.join(Self::CACHE_DIR_NAME)
                .join(Self::METADATA_DIR_NAME)
        })
    }

    /// Host parallel-task capacity.
    pub fn max_parallelism() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

/// Operator configuration loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverConfig {
    pub packages_root: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub registry_base_url: String,
    pub license_base_url: Option<String>,
    pub custom_api_endpoint: Option<String>,
    /// Property name -> extra banned values, merged over the built-in defaults.
    pub banned_values: HashMap<String, Vec<String>>,
    pub max_parallelism: Option<usize>,
    pub identity_lock_timeout_secs: Option<u64>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            packages_root: None,
            cache_dir: None,
            registry_base_url: ResolverDefaults::REGISTRY_BASE_URL.to_string(),
            license_base_url: Some(ResolverDefaults::LICENSE_BASE_URL.to_string()),
            custom_api_endpoint: None,
            banned_values: HashMap::new(),
            max_parallelism: None,
            identity_lock_timeout_secs: None,
        }
    }
}

impl ResolverConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| MetadataError::io_with_path(e, path))?;
        let config: ResolverConfig =
            serde_json::from_str(&contents).map_err(|e| MetadataError::Config {
                message: format!("Failed to parse {}: {}", path.display(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check URLs and numeric bounds.
    pub fn validate(&self) -> Result<()> {
        check_url("registryBaseUrl", &self.registry_base_url)?;
        if let Some(ref url) = self.license_base_url {
            check_url("licenseBaseUrl", url)?;
        }
        if let Some(ref url) = self.custom_api_endpoint {
            check_url("customApiEndpoint", url)?;
        }
        if self.max_parallelism == Some(0) {
            return Err(MetadataError::Config {
                message: "maxParallelism must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn identity_lock_timeout(&self) -> Duration {
        self.identity_lock_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(ResolverDefaults::IDENTITY_LOCK_TIMEOUT)
    }
}

fn check_url(field: &str, value: &str) -> Result<()> {
    url::Url::parse(value).map_err(|e| MetadataError::Config {
        message: format!("{} is not a valid URL ({}): {}", field, value, e),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(CacheConfig::LOCK_TIMEOUT > CacheConfig::LOCK_POLL_INTERVAL);
        assert!(CacheConfig::RECONCILE_PERIOD > Duration::ZERO);
        assert!(NetworkConfig::REQUEST_TIMEOUT > Duration::ZERO);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ResolverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.identity_lock_timeout(),
            ResolverDefaults::IDENTITY_LOCK_TIMEOUT
        );
    }

    #[test]
    fn test_load_camel_case_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pkgmeta.json");
        std::fs::write(
            &path,
            r#"{
                "registryBaseUrl": "https://registry.example.com/packages",
                "customApiEndpoint": "https://meta.example.com/lookup",
                "bannedValues": { "Authors": ["Your Name"] },
                "maxParallelism": 1,
                "identityLockTimeoutSecs": 9
            }"#,
        )
        .unwrap();

        let config = ResolverConfig::load(&path).unwrap();
        assert_eq!(config.registry_base_url, "https://registry.example.com/packages");
        assert_eq!(config.max_parallelism, Some(1));
        assert_eq!(config.banned_values["Authors"], vec!["Your Name".to_string()]);
        assert_eq!(config.identity_lock_timeout(), Duration::from_secs(9));
        // Unspecified fields keep their defaults
        assert_eq!(
            config.license_base_url.as_deref(),
            Some(ResolverDefaults::LICENSE_BASE_URL)
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ResolverConfig {
            custom_api_endpoint: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MetadataError::Config { .. })
        ));

        let config = ResolverConfig {
            max_parallelism: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
