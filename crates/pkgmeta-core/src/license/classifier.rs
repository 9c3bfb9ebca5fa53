//! License classification for descriptors without a structured expression.
//!
//! When a package ships only a license file or a license URL, a classifier
//! turns that free text into license names. The engine treats this as an
//! optional collaborator; `KnownLicenseClassifier` covers the common cases.

use super::expression::identifiers_in_order;

/// Maps free-text license content or a license URL to license names.
pub trait LicenseClassifier: Send + Sync {
    /// Classify license file content.
    fn classify_text(&self, content: &str) -> Vec<String>;

    /// Classify a license URL.
    fn classify_url(&self, url: &str) -> Vec<String>;
}

/// Opening phrases of widely used license texts.
const TEXT_SIGNATURES: &[(&str, &str)] = &[
    ("permission is hereby granted, free of charge", "MIT"),
    ("apache license\nversion 2.0", "Apache-2.0"),
    ("apache license, version 2.0", "Apache-2.0"),
    ("gnu general public license\nversion 3", "GPL-3.0"),
    ("gnu general public license version 3", "GPL-3.0"),
    ("gnu general public license\nversion 2", "GPL-2.0"),
    ("gnu lesser general public license", "LGPL-2.1"),
    ("mozilla public license version 2.0", "MPL-2.0"),
    ("mozilla public license, version 2.0", "MPL-2.0"),
    ("this is free and unencumbered software released into the public domain", "Unlicense"),
    ("permission to use, copy, modify, and/or distribute this software for any purpose", "ISC"),
];

/// Host/path prefixes whose next path segment is an SPDX identifier.
const URL_PREFIXES: &[&str] = &[
    "licenses.nuget.org/",
    "opensource.org/licenses/",
    "spdx.org/licenses/",
];

/// Well-known license URLs that do not embed an identifier directly.
const URL_SIGNATURES: &[(&str, &str)] = &[
    ("apache.org/licenses/license-2.0", "Apache-2.0"),
    ("gnu.org/licenses/gpl-3.0", "GPL-3.0"),
    ("gnu.org/licenses/gpl-2.0", "GPL-2.0"),
    ("gnu.org/licenses/lgpl-3.0", "LGPL-3.0"),
    ("gnu.org/licenses/lgpl-2.1", "LGPL-2.1"),
    ("mozilla.org/mpl/2.0", "MPL-2.0"),
];

/// Built-in classifier recognising SPDX headers, common license openings and
/// common license URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct KnownLicenseClassifier;

impl LicenseClassifier for KnownLicenseClassifier {
    fn classify_text(&self, content: &str) -> Vec<String> {
        for line in content.lines().take(20) {
            if let Some((_, expression)) = line.split_once("SPDX-License-Identifier:") {
                let names = identifiers_in_order(expression.trim());
                if !names.is_empty() {
                    return names;
                }
            }
        }

        let normalized: String = content
            .to_lowercase()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        let mut names = Vec::new();
        for (signature, name) in TEXT_SIGNATURES {
            if normalized.contains(signature) && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    fn classify_url(&self, url: &str) -> Vec<String> {
        let lowered = url.trim().to_lowercase();
        let without_scheme = lowered
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("www.");

        for prefix in URL_PREFIXES {
            if let Some(rest) = without_scheme.strip_prefix(prefix) {
                // Recover the original casing of the identifier segment
                let offset = url.trim().len() - rest.len();
                let segment = url.trim().get(offset..).unwrap_or(rest);
                let id = segment
                    .split(['/', '?', '#'])
                    .next()
                    .unwrap_or_default()
                    .trim_end_matches(".html")
                    .trim_end_matches(".php");
                if !id.is_empty() {
                    return vec![id.to_string()];
                }
            }
        }

        URL_SIGNATURES
            .iter()
            .filter(|(signature, _)| without_scheme.contains(signature))
            .map(|(_, name)| name.to_string())
            .take(1)
            .collect()
    }
}
