//! Placeholder values that never count as resolved.

use crate::model::{PropertyKey, PropertyValue};
use std::collections::{HashMap, HashSet};

/// Template text left in package descriptors by project scaffolding.
const DEFAULT_BANNED: &[(&str, &[&str])] = &[
    (
        "LicenseUrl",
        &[
            "https://aka.ms/deprecateLicenseUrl",
            "http://LICENSE_URL_HERE_OR_DELETE_THIS_LINE",
        ],
    ),
    ("ProjectUrl", &["http://PROJECT_URL_HERE_OR_DELETE_THIS_LINE"]),
    ("IconUrl", &["http://ICON_URL_HERE_OR_DELETE_THIS_LINE"]),
    ("Description", &["Package description"]),
    ("Tags", &["Tag1 Tag2"]),
    (
        "ReleaseNotes",
        &["Summary of changes made in this release of the package."],
    ),
];

/// Per-property sets of banned values, compared trimmed and case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct BannedValues {
    by_property: HashMap<String, HashSet<String>>,
}

impl BannedValues {
    /// No banned values at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn defaults() -> Self {
        let mut banned = Self::empty();
        for (property, values) in DEFAULT_BANNED {
            for value in *values {
                banned.ban(property, value);
            }
        }
        banned
    }

    /// Defaults plus `extra`, keyed by property name.
    pub fn with_overrides(extra: &HashMap<String, Vec<String>>) -> Self {
        let mut banned = Self::defaults();
        for (property, values) in extra {
            for value in values {
                banned.ban(property, value);
            }
        }
        banned
    }

    pub fn ban(&mut self, property: &str, value: &str) {
        self.by_property
            .entry(property.to_string())
            .or_default()
            .insert(normalize(value));
    }

    /// Whether `value` is a placeholder for `key`.
    ///
    /// A name list is banned only when every name in it is banned.
    pub fn is_banned(&self, key: &PropertyKey, value: &PropertyValue) -> bool {
        let Some(values) = self.by_property.get(key.property_name()) else {
            return false;
        };
        match value {
            PropertyValue::Text(text) => values.contains(&normalize(text)),
            PropertyValue::Flag(flag) => values.contains(&flag.to_string()),
            PropertyValue::Names(names) => {
                !names.is_empty() && names.iter().all(|name| values.contains(&normalize(name)))
            }
        }
    }

    /// `value` with placeholders removed, or `None` if nothing usable is left.
    ///
    /// Banned names are dropped from a name list; other values are kept or
    /// rejected whole.
    pub fn screen(&self, key: &PropertyKey, value: PropertyValue) -> Option<PropertyValue> {
        let Some(values) = self.by_property.get(key.property_name()) else {
            return Some(value);
        };
        match value {
            PropertyValue::Names(names) => {
                let kept: Vec<String> = names
                    .into_iter()
                    .filter(|name| !values.contains(&normalize(name)))
                    .collect();
                (!kept.is_empty()).then_some(PropertyValue::Names(kept))
            }
            other => (!self.is_banned(key, &other)).then_some(other),
        }
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LicenseProperty, PackageProperty};

    #[test]
    fn test_default_placeholders() {
        let banned = BannedValues::defaults();
        let url = PropertyKey::license("MIT", LicenseProperty::LicenseUrl);
        assert!(banned.is_banned(
            &url,
            &PropertyValue::Text("  HTTPS://aka.ms/deprecateLicenseUrl ".into())
        ));
        assert!(!banned.is_banned(
            &url,
            &PropertyValue::Text("https://licenses.nuget.org/MIT".into())
        ));
        assert!(banned.is_banned(
            &PropertyKey::Package(PackageProperty::Description),
            &PropertyValue::Text("package description".into())
        ));
        // Scoped to the property it was configured for
        assert!(!banned.is_banned(
            &PropertyKey::Package(PackageProperty::Title),
            &PropertyValue::Text("Package description".into())
        ));
    }

    #[test]
    fn test_overrides_merge_with_defaults() {
        let mut extra = HashMap::new();
        extra.insert("Authors".to_string(), vec!["TODO".to_string()]);
        let banned = BannedValues::with_overrides(&extra);
        let authors = PropertyKey::Package(PackageProperty::Authors);
        assert!(banned.is_banned(&authors, &PropertyValue::Text("todo".into())));
        assert!(banned.is_banned(
            &PropertyKey::Package(PackageProperty::Tags),
            &PropertyValue::Text("Tag1 Tag2".into())
        ));
    }

    #[test]
    fn test_flags_are_banned_when_configured() {
        let mut banned = BannedValues::empty();
        banned.ban("RequireLicenseAcceptance", "FALSE");
        let key = PropertyKey::Package(PackageProperty::RequireLicenseAcceptance);
        assert!(banned.is_banned(&key, &PropertyValue::Flag(false)));
        assert!(!banned.is_banned(&key, &PropertyValue::Flag(true)));
        assert_eq!(banned.screen(&key, PropertyValue::Flag(false)), None);
    }

    #[test]
    fn test_placeholder_license_names_are_dropped() {
        let mut banned = BannedValues::defaults();
        banned.ban("LicenseNames", "UNKNOWN");
        let key = PropertyKey::Package(PackageProperty::LicenseNames);

        let only_placeholder = PropertyValue::Names(vec!["unknown".into()]);
        assert!(banned.is_banned(&key, &only_placeholder));
        assert_eq!(banned.screen(&key, only_placeholder), None);

        let mixed = PropertyValue::Names(vec!["UNKNOWN".into(), "MIT".into()]);
        assert!(!banned.is_banned(&key, &mixed));
        assert_eq!(
            banned.screen(&key, mixed),
            Some(PropertyValue::Names(vec!["MIT".into()]))
        );
    }

    #[test]
    fn test_screen_keeps_unconfigured_properties() {
        let banned = BannedValues::defaults();
        let key = PropertyKey::Package(PackageProperty::Title);
        assert_eq!(
            banned.screen(&key, PropertyValue::Text("Foo".into())),
            Some(PropertyValue::Text("Foo".into()))
        );
    }
}
