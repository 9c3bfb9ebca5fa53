//! Operator-provided HTTP API tier.
//!
//! `GET {endpoint}?packageName=..&packageVersion=..&propertyName=..` with
//! `licenseName` added for license-scoped properties. The reply is plain
//! text; an empty body or a 404 means the API has no value.

use super::run::ResolutionRun;
use super::source::{names_value, scalar_value, MetadataSource};
use crate::error::{MetadataError, Result};
use crate::license::identifiers_in_order;
use crate::model::{PropertyKey, PropertyValue, ValueKind};
use crate::network::HttpFetch;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

pub struct CustomApiSource {
    http: Arc<dyn HttpFetch>,
    endpoint: String,
}

impl CustomApiSource {
    pub fn new(http: Arc<dyn HttpFetch>, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn query_url(&self, run: &ResolutionRun, key: &PropertyKey) -> Result<Url> {
        let identity = run.identity();
        let mut params = vec![
            ("packageName", identity.name()),
            ("packageVersion", identity.version()),
            ("propertyName", key.property_name()),
        ];
        if let Some(license) = key.license_name() {
            params.push(("licenseName", license));
        }
        Url::parse_with_params(&self.endpoint, &params).map_err(|e| MetadataError::Config {
            message: format!("Invalid custom API endpoint {}: {}", self.endpoint, e),
        })
    }
}

/// License names from a JSON array reply, else from an expression.
fn parse_names(body: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(body) {
        Ok(names) => names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect(),
        Err(_) => identifiers_in_order(body),
    }
}

#[async_trait]
impl MetadataSource for CustomApiSource {
    fn name(&self) -> &'static str {
        "custom-api"
    }

    async fn fetch(&self, run: &ResolutionRun, key: &PropertyKey) -> Result<Option<PropertyValue>> {
        let url = self.query_url(run, key)?;
        let Some(body) = self.http.get_text(url.as_str(), run.cancel()).await? else {
            return Ok(None);
        };
        let body = body.trim();
        if body.is_empty() {
            return Ok(None);
        }
        Ok(match key.kind() {
            ValueKind::Names => names_value(parse_names(body)),
            ValueKind::Text | ValueKind::Flag => scalar_value(key, body),
        })
    }
}
