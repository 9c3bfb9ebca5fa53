//! The fixed set of metadata properties and their value model.

use crate::error::MetadataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shape of the value a property resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Flag,
    Names,
}

/// Package-scoped properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageProperty {
    Title,
    Authors,
    Owners,
    Description,
    Summary,
    ProjectUrl,
    RepositoryUrl,
    IconUrl,
    Tags,
    Copyright,
    ReleaseNotes,
    RequireLicenseAcceptance,
    LicenseNames,
}

impl PackageProperty {
    pub const ALL: [PackageProperty; 13] = [
        PackageProperty::Title,
        PackageProperty::Authors,
        PackageProperty::Owners,
        PackageProperty::Description,
        PackageProperty::Summary,
        PackageProperty::ProjectUrl,
        PackageProperty::RepositoryUrl,
        PackageProperty::IconUrl,
        PackageProperty::Tags,
        PackageProperty::Copyright,
        PackageProperty::ReleaseNotes,
        PackageProperty::RequireLicenseAcceptance,
        PackageProperty::LicenseNames,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageProperty::Title => "Title",
            PackageProperty::Authors => "Authors",
            PackageProperty::Owners => "Owners",
            PackageProperty::Description => "Description",
            PackageProperty::Summary => "Summary",
            PackageProperty::ProjectUrl => "ProjectUrl",
            PackageProperty::RepositoryUrl => "RepositoryUrl",
            PackageProperty::IconUrl => "IconUrl",
            PackageProperty::Tags => "Tags",
            PackageProperty::Copyright => "Copyright",
            PackageProperty::ReleaseNotes => "ReleaseNotes",
            PackageProperty::RequireLicenseAcceptance => "RequireLicenseAcceptance",
            PackageProperty::LicenseNames => "LicenseNames",
        }
    }

    /// Property with this exact PascalCase name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            PackageProperty::RequireLicenseAcceptance => ValueKind::Flag,
            PackageProperty::LicenseNames => ValueKind::Names,
            _ => ValueKind::Text,
        }
    }
}

impl FromStr for PackageProperty {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| MetadataError::Config {
            message: format!("Unknown property name: {}", s),
        })
    }
}

impl fmt::Display for PackageProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// License-scoped properties, resolved once per declared license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LicenseProperty {
    LicenseUrl,
    LicenseContent,
}

impl LicenseProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseProperty::LicenseUrl => "LicenseUrl",
            LicenseProperty::LicenseContent => "LicenseContent",
        }
    }
}

/// What a tier is asked to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Package(PackageProperty),
    License {
        name: String,
        property: LicenseProperty,
    },
}

impl PropertyKey {
    pub fn license(name: impl Into<String>, property: LicenseProperty) -> Self {
        PropertyKey::License {
            name: name.into(),
            property,
        }
    }

    /// Property name as used by the custom API and banned-value configuration.
    pub fn property_name(&self) -> &'static str {
        match self {
            PropertyKey::Package(p) => p.as_str(),
            PropertyKey::License { property, .. } => property.as_str(),
        }
    }

    pub fn license_name(&self) -> Option<&str> {
        match self {
            PropertyKey::License { name, .. } => Some(name),
            PropertyKey::Package(_) => None,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            PropertyKey::Package(p) => p.kind(),
            PropertyKey::License { .. } => ValueKind::Text,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::Package(p) => write!(f, "{}", p),
            PropertyKey::License { name, property } => {
                write!(f, "{}[{}]", property.as_str(), name)
            }
        }
    }
}

/// A resolved value. "Not resolved" is always `Option::None` around this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Flag(bool),
    Text(String),
    Names(Vec<String>),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            PropertyValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_names(&self) -> Option<&[String]> {
        match self {
            PropertyValue::Names(names) => Some(names),
            _ => None,
        }
    }

    /// An empty license-name list counts as unresolved; any present scalar is
    /// resolved.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, PropertyValue::Names(names) if names.is_empty())
    }
}

/// Parse a textual boolean as found in descriptors, pages and API replies.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_name_roundtrip() {
        for property in PackageProperty::ALL {
            assert_eq!(PackageProperty::parse(property.as_str()), Some(property));
            assert_eq!(property.as_str().parse::<PackageProperty>().unwrap(), property);
        }
        assert_eq!(PackageProperty::parse("Nope"), None);
        assert!(matches!(
            "title".parse::<PackageProperty>(),
            Err(MetadataError::Config { .. })
        ));
    }

    #[test]
    fn test_property_key_names() {
        let key = PropertyKey::license("MIT", LicenseProperty::LicenseUrl);
        assert_eq!(key.property_name(), "LicenseUrl");
        assert_eq!(key.license_name(), Some("MIT"));
        assert_eq!(key.to_string(), "LicenseUrl[MIT]");
        assert_eq!(
            PropertyKey::Package(PackageProperty::LicenseNames).kind(),
            ValueKind::Names
        );
    }

    #[test]
    fn test_unresolved_sentinels() {
        assert!(PropertyValue::Names(vec![]).is_unresolved());
        assert!(!PropertyValue::Names(vec!["MIT".into()]).is_unresolved());
        assert!(!PropertyValue::Text(String::new()).is_unresolved());
        assert!(!PropertyValue::Flag(false).is_unresolved());
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag(" True "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_value_serializes_untagged() {
        let json = serde_json::to_string(&PropertyValue::Flag(true)).unwrap();
        assert_eq!(json, "true");
        let back: PropertyValue = serde_json::from_str("\"Jane\"").unwrap();
        assert_eq!(back, PropertyValue::Text("Jane".into()));
    }
}
