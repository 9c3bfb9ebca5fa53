//! Remote registry page tier.
//!
//! The package page is fetched once per run and parsed into a plain
//! `RegistryPage`, so the HTML tree never crosses an await point.

use super::run::ResolutionRun;
use super::source::{names_value, scalar_value, MetadataSource};
use crate::error::{MetadataError, Result};
use crate::license::identifiers_in_order;
use crate::model::{LicenseProperty, PackageIdentity, PackageProperty, PropertyKey, PropertyValue};
use crate::network::HttpFetch;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

enum Extract {
    Text,
    Attr(&'static str),
    /// Text of every match, joined with spaces.
    JoinAll,
}

const PAGE_FIELDS: &[(PackageProperty, &str, Extract)] = &[
    (PackageProperty::Title, "#package-title", Extract::Text),
    (PackageProperty::Authors, "#package-authors", Extract::Text),
    (PackageProperty::Owners, "#package-owners", Extract::Text),
    (PackageProperty::Description, "#package-description", Extract::Text),
    (PackageProperty::Summary, "#package-summary", Extract::Text),
    (PackageProperty::ProjectUrl, "a#project-url", Extract::Attr("href")),
    (PackageProperty::RepositoryUrl, "a#repository-url", Extract::Attr("href")),
    (PackageProperty::IconUrl, "img#package-icon", Extract::Attr("src")),
    (PackageProperty::Tags, "#package-tags .tag", Extract::JoinAll),
    (PackageProperty::Copyright, "#package-copyright", Extract::Text),
    (PackageProperty::ReleaseNotes, "#release-notes", Extract::Text),
    (
        PackageProperty::RequireLicenseAcceptance,
        "#require-license-acceptance",
        Extract::Text,
    ),
];

const LICENSE_EXPRESSION: &str = "#license-expression";
const DECLARED_LICENSE: &str = "[data-license]";
const LICENSE_LINK: &str = "a[data-license][href]";
const LICENSE_TEXT: &[&str] = &["#license-text", "pre"];

fn selector(url: &str, css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| MetadataError::Page {
        url: url.to_string(),
        message: format!("bad selector {}: {:?}", css, e),
    })
}

fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text: String = element.text().collect();
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Values scraped from a registry package page.
#[derive(Debug, Clone, Default)]
pub struct RegistryPage {
    fields: HashMap<PackageProperty, String>,
    license_expression: Option<String>,
    declared_licenses: Vec<String>,
    license_links: Vec<(String, String)>,
}

impl RegistryPage {
    pub fn parse(url: &str, html: &str) -> Result<Self> {
        let document = Html::parse_document(html);
        let mut page = RegistryPage::default();

        for (property, css, extract) in PAGE_FIELDS {
            let selector = selector(url, css)?;
            let mut matches = document.select(&selector);
            let value = match extract {
                Extract::Text => matches.next().and_then(element_text),
                Extract::Attr(attribute) => matches
                    .next()
                    .and_then(|el| el.value().attr(attribute))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string),
                Extract::JoinAll => {
                    let parts: Vec<String> = matches.filter_map(element_text).collect();
                    (!parts.is_empty()).then(|| parts.join(" "))
                }
            };
            if let Some(value) = value {
                page.fields.insert(*property, value);
            }
        }

        page.license_expression = document
            .select(&selector(url, LICENSE_EXPRESSION)?)
            .next()
            .and_then(element_text);

        for element in document.select(&selector(url, DECLARED_LICENSE)?) {
            if let Some(name) = element.value().attr("data-license").map(str::trim) {
                if !name.is_empty() && !page.declared_licenses.iter().any(|n| n == name) {
                    page.declared_licenses.push(name.to_string());
                }
            }
        }

        for element in document.select(&selector(url, LICENSE_LINK)?) {
            let value = element.value();
            if let (Some(name), Some(href)) = (value.attr("data-license"), value.attr("href")) {
                page.license_links
                    .push((name.trim().to_string(), href.trim().to_string()));
            }
        }

        Ok(page)
    }

    pub fn field(&self, property: PackageProperty) -> Option<&str> {
        self.fields.get(&property).map(String::as_str)
    }

    /// Names from the license expression, else from `data-license` markers.
    pub fn license_names(&self) -> Vec<String> {
        let from_expression = self
            .license_expression
            .as_deref()
            .map(identifiers_in_order)
            .unwrap_or_default();
        if from_expression.is_empty() {
            self.declared_licenses.clone()
        } else {
            from_expression
        }
    }

    pub fn license_link(&self, name: &str) -> Option<&str> {
        self.license_links
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, href)| href.as_str())
    }
}

/// License text from a license page: `#license-text`, else the first `pre`.
pub fn extract_license_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    LICENSE_TEXT.iter().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        document.select(&selector).next().and_then(element_text)
    })
}

/// Second tier: the public registry's package page.
pub struct RegistryPageSource {
    http: Arc<dyn HttpFetch>,
    base_url: String,
    license_base_url: Option<String>,
}

impl RegistryPageSource {
    pub fn new(
        http: Arc<dyn HttpFetch>,
        base_url: impl Into<String>,
        license_base_url: Option<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            license_base_url,
        }
    }

    pub fn page_url(&self, identity: &PackageIdentity) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            identity.name(),
            identity.version()
        )
    }

    async fn page(&self, run: &ResolutionRun) -> Result<Option<Arc<RegistryPage>>> {
        let url = self.page_url(run.identity());
        let url = url.as_str();
        run.page(url, || async move {
            let Some(html) = self.document(run, url).await? else {
                debug!("No registry page at {}", url);
                return Ok(None);
            };
            RegistryPage::parse(url, &html).map(Some)
        })
        .await
    }

    async fn document(&self, run: &ResolutionRun, url: &str) -> Result<Option<Arc<String>>> {
        run.document(url, || self.http.get_text(url, run.cancel()))
            .await
    }

    /// Link on the page, else the license base URL. Needs the page to exist.
    async fn license_url(&self, run: &ResolutionRun, name: &str) -> Result<Option<String>> {
        let Some(page) = self.page(run).await? else {
            return Ok(None);
        };
        if let Some(href) = page.license_link(name) {
            return Ok(Some(href.to_string()));
        }
        Ok(self
            .license_base_url
            .as_deref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), name)))
    }
}

#[async_trait]
impl MetadataSource for RegistryPageSource {
    fn name(&self) -> &'static str {
        "registry-page"
    }

    async fn fetch(&self, run: &ResolutionRun, key: &PropertyKey) -> Result<Option<PropertyValue>> {
        match key {
            PropertyKey::Package(PackageProperty::LicenseNames) => {
                let Some(page) = self.page(run).await? else {
                    return Ok(None);
                };
                Ok(names_value(page.license_names()))
            }
            PropertyKey::Package(property) => {
                let Some(page) = self.page(run).await? else {
                    return Ok(None);
                };
                Ok(page.field(*property).and_then(|raw| scalar_value(key, raw)))
            }
            PropertyKey::License { name, property } => match property {
                LicenseProperty::LicenseUrl => Ok(self
                    .license_url(run, name)
                    .await?
                    .map(PropertyValue::Text)),
                LicenseProperty::LicenseContent => {
                    let url = match run.license_url(name) {
                        Some(url) => url,
                        None => match self.license_url(run, name).await? {
                            Some(url) => url,
                            None => return Ok(None),
                        },
                    };
                    let Some(html) = self.document(run, &url).await? else {
                        return Ok(None);
                    };
                    Ok(extract_license_text(&html).and_then(|text| scalar_value(key, &text)))
                }
            },
        }
    }
}
