//! Data model: package identities, the property set, and metadata records.

mod identity;
mod property;
mod record;

pub use identity::PackageIdentity;
pub use property::{
    parse_flag, LicenseProperty, PackageProperty, PropertyKey, PropertyValue, ValueKind,
};
pub use record::{License, MetadataRecord, PendingRecord};
