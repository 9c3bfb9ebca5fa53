//! Tiered metadata resolution.
//!
//! A `MetadataResolutionPipeline` asks each `MetadataSource` in order:
//! the local package descriptor, the registry page, then an optional
//! custom API. Per-run document memos live in `ResolutionRun`.

mod banned;
mod custom_api;
mod descriptor;
mod fs;
mod pipeline;
mod registry;
mod run;
mod source;

pub use banned::BannedValues;
pub use custom_api::CustomApiSource;
pub use descriptor::{LocalDescriptor, LocalDescriptorSource};
pub use fs::{FileSystem, GlobalPackagesLayout, InstallPathResolver, LocalFileSystem};
pub use pipeline::MetadataResolutionPipeline;
pub use registry::{extract_license_text, RegistryPage, RegistryPageSource};
pub use run::ResolutionRun;
pub use source::MetadataSource;
