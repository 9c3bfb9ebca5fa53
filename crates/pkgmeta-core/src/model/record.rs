//! Metadata records: the output of a resolution run and the durable cache value.

use super::identity::PackageIdentity;
use super::property::{LicenseProperty, PackageProperty, PropertyValue};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// One declared license of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct License {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl License {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            content: None,
        }
    }
}

/// Resolved metadata for one package identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub identity: PackageIdentity,
    /// Property name -> value. License names live in `licenses`.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    #[serde(default)]
    pub licenses: Vec<License>,
    pub resolved_at: String,
    /// Tier failures seen while resolving; not persisted.
    #[serde(skip)]
    pub tier_failures: usize,
}

impl MetadataRecord {
    pub fn get(&self, property: PackageProperty) -> Option<&PropertyValue> {
        self.properties.get(property.as_str())
    }

    pub fn text(&self, property: PackageProperty) -> Option<&str> {
        self.get(property).and_then(PropertyValue::as_text)
    }

    pub fn flag(&self, property: PackageProperty) -> Option<bool> {
        self.get(property).and_then(PropertyValue::as_flag)
    }

    pub fn license_names(&self) -> Vec<&str> {
        self.licenses.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn license(&self, name: &str) -> Option<&License> {
        self.licenses.iter().find(|l| l.name == name)
    }

    /// Nothing was resolved for this identity.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.licenses.is_empty()
    }

    /// Whether every tier answered without failing.
    pub fn is_clean(&self) -> bool {
        self.tier_failures == 0
    }
}

/// A record under construction. Property tasks running concurrently write
/// into it through shared references; `finish` freezes it.
#[derive(Debug)]
pub struct PendingRecord {
    identity: PackageIdentity,
    properties: Mutex<BTreeMap<String, PropertyValue>>,
    licenses: Mutex<Vec<License>>,
    failures: AtomicUsize,
}

impl PendingRecord {
    pub fn new(identity: PackageIdentity) -> Self {
        Self {
            identity,
            properties: Mutex::new(BTreeMap::new()),
            licenses: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn identity(&self) -> &PackageIdentity {
        &self.identity
    }

    pub fn set(&self, property: PackageProperty, value: PropertyValue) {
        let mut properties = self
            .properties
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        properties.insert(property.as_str().to_string(), value);
    }

    /// Declare licenses in order; url and content start unresolved.
    pub fn declare_licenses(&self, names: &[String]) {
        let mut licenses = self
            .licenses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for name in names {
            if !licenses.iter().any(|l| &l.name == name) {
                licenses.push(License::named(name.clone()));
            }
        }
    }

    pub fn set_license_field(&self, name: &str, property: LicenseProperty, value: String) {
        let mut licenses = self
            .licenses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(license) = licenses.iter_mut().find(|l| l.name == name) {
            match property {
                LicenseProperty::LicenseUrl => license.url = Some(value),
                LicenseProperty::LicenseContent => license.content = Some(value),
            }
        }
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn finish(self) -> MetadataRecord {
        MetadataRecord {
            identity: self.identity,
            properties: self
                .properties
                .into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            licenses: self
                .licenses
                .into_inner()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            resolved_at: Utc::now().to_rfc3339(),
            tier_failures: self.failures.into_inner(),
        }
    }
}
