//! Package identity: the (name, version) key used everywhere.

use crate::error::{MetadataError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Immutable (name, version) pair identifying a third-party package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentity {
    name: String,
    version: String,
}

impl PackageIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Parse `name@version` or `name/version`.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (name, version) = input
            .rsplit_once('@')
            .or_else(|| input.rsplit_once('/'))
            .ok_or_else(|| MetadataError::Config {
                message: format!("Expected name@version, got '{}'", input),
            })?;

        if name.trim().is_empty() || version.trim().is_empty() {
            return Err(MetadataError::Config {
                message: format!("Package name and version must be non-empty: '{}'", input),
            });
        }

        Ok(Self::new(name.trim(), version.trim()))
    }

    /// Lowercase, filesystem-safe stem for the durable cache record.
    pub fn cache_file_stem(&self) -> String {
        let raw = format!("{}.{}", self.name, self.version).to_lowercase();
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl FromStr for PackageIdentity {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let a = PackageIdentity::parse("Newtonsoft.Json@13.0.3").unwrap();
        assert_eq!(a.name(), "Newtonsoft.Json");
        assert_eq!(a.version(), "13.0.3");

        let b: PackageIdentity = "Serilog/3.1.1".parse().unwrap();
        assert_eq!(b, PackageIdentity::new("Serilog", "3.1.1"));
    }

    #[test]
    fn test_parse_rejects_incomplete() {
        assert!(PackageIdentity::parse("Serilog").is_err());
        assert!(PackageIdentity::parse("@1.0.0").is_err());
        assert!(PackageIdentity::parse("Serilog@").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let id = PackageIdentity::new("Foo", "1.0.0-beta+build");
        assert_eq!(id.to_string(), "Foo@1.0.0-beta+build");
        assert_eq!(PackageIdentity::parse(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_cache_file_stem_is_safe() {
        let id = PackageIdentity::new("My Pkg/Evil", "1.0:0");
        assert_eq!(id.cache_file_stem(), "my_pkg_evil.1.0_0");
    }
}
