//! The tier abstraction and value helpers shared by the built-in tiers.

use super::run::ResolutionRun;
use crate::error::Result;
use crate::model::{parse_flag, PropertyKey, PropertyValue, ValueKind};
use async_trait::async_trait;

/// One metadata tier.
///
/// `Ok(None)` means the tier has no value for `key`. Errors are tier
/// failures except for `Cancelled` and `LockTimeout`, which abort the run.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, run: &ResolutionRun, key: &PropertyKey) -> Result<Option<PropertyValue>>;
}

/// Convert raw text into a value of the key's kind. Blank text is no value.
pub(crate) fn scalar_value(key: &PropertyKey, raw: &str) -> Option<PropertyValue> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    match key.kind() {
        ValueKind::Text => Some(PropertyValue::Text(text.to_string())),
        ValueKind::Flag => parse_flag(text).map(PropertyValue::Flag),
        ValueKind::Names => None,
    }
}

/// Wrap license names, treating an empty list as no value.
pub(crate) fn names_value(names: Vec<String>) -> Option<PropertyValue> {
    if names.is_empty() {
        None
    } else {
        Some(PropertyValue::Names(names))
    }
}
