//! pkgmeta core - package metadata resolution with a durable, shared cache.
//!
//! Resolves descriptive metadata (authors, description, licenses, ...) for
//! package identities by asking tiers in order: the locally installed
//! package descriptor, the public registry page, then an optional custom
//! API. Results are persisted as one JSON file per identity in a directory
//! that several processes can share.
//!
//! # Example
//!
//! ```rust,ignore
//! use pkgmeta_core::{CancellationToken, MetadataService, PackageIdentity};
//!
//! #[tokio::main]
//! async fn main() -> pkgmeta_core::Result<()> {
//!     let service = MetadataService::builder().build().await?;
//!     let identity = PackageIdentity::new("Newtonsoft.Json", "13.0.3");
//!
//!     let record = service.resolve(&identity, &CancellationToken::new()).await?;
//!     println!("Licenses: {:?}", record.license_names());
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod license;
pub mod model;
pub mod network;
pub mod resolve;
pub mod sync;

mod api;

// Re-export commonly used types
pub use api::{MetadataService, MetadataServiceBuilder};
pub use cache::{CacheEvent, DirectoryCacheOptions, DurableDirectoryCache};
pub use cancel::{CancellationToken, CancelledError};
pub use config::ResolverConfig;
pub use error::{MetadataError, Result};
pub use license::{extract_identifiers, KnownLicenseClassifier, LicenseClassifier};
pub use model::{
    License, LicenseProperty, MetadataRecord, PackageIdentity, PackageProperty, PropertyKey,
    PropertyValue,
};
pub use network::{HttpClient, HttpFetch};
pub use resolve::{
    FileSystem, InstallPathResolver, MetadataResolutionPipeline, MetadataSource, ResolutionRun,
};
pub use sync::{PackageLockManager, SingleFlightCache};
