//! Tiered resolution of every property of one package identity.

use super::banned::BannedValues;
use super::run::ResolutionRun;
use super::source::MetadataSource;
use crate::cancel::CancellationToken;
use crate::config::ResolverDefaults;
use crate::error::Result;
use crate::model::{
    LicenseProperty, MetadataRecord, PackageIdentity, PackageProperty, PendingRecord,
    PropertyKey, PropertyValue,
};
use futures::future::{join_all, try_join_all};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs each property through the tiers in order; the first usable value wins.
///
/// Properties resolve concurrently. At most `max_parallelism` tier chains
/// run at the same time within one resolution.
pub struct MetadataResolutionPipeline {
    sources: Vec<Arc<dyn MetadataSource>>,
    banned: BannedValues,
    max_parallelism: usize,
}

impl MetadataResolutionPipeline {
    pub fn new(sources: Vec<Arc<dyn MetadataSource>>, banned: BannedValues) -> Self {
        Self {
            sources,
            banned,
            max_parallelism: ResolverDefaults::max_parallelism(),
        }
    }

    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism.max(1);
        self
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Resolve every property of `identity`.
    ///
    /// Tier failures are logged and counted on the record. Only
    /// cancellation and lock timeouts fail the call.
    pub async fn resolve(
        &self,
        identity: &PackageIdentity,
        cancel: &CancellationToken,
    ) -> Result<MetadataRecord> {
        cancel.check()?;
        let run = ResolutionRun::new(identity.clone(), cancel.clone(), self.max_parallelism);
        let pending = PendingRecord::new(identity.clone());

        let outcomes = join_all(
            PackageProperty::ALL
                .into_iter()
                .map(|property| self.resolve_package_property(&run, &pending, property)),
        )
        .await;
        for outcome in outcomes {
            outcome?;
        }
        cancel.check()?;

        let record = pending.finish();
        info!(
            "Resolved {} ({} properties, {} licenses, {} tier failures)",
            identity,
            record.properties.len(),
            record.licenses.len(),
            record.tier_failures
        );
        Ok(record)
    }

    async fn resolve_package_property(
        &self,
        run: &ResolutionRun,
        pending: &PendingRecord,
        property: PackageProperty,
    ) -> Result<()> {
        let key = PropertyKey::Package(property);
        match self.resolve_key(run, pending, &key).await? {
            Some(PropertyValue::Names(names)) => {
                pending.declare_licenses(&names);
                try_join_all(
                    names
                        .iter()
                        .map(|name| self.resolve_license(run, pending, name)),
                )
                .await?;
            }
            Some(value) => pending.set(property, value),
            None => debug!("{} {} unresolved", run.identity(), key),
        }
        Ok(())
    }

    /// URL first, so content tiers can follow the resolved URL.
    async fn resolve_license(
        &self,
        run: &ResolutionRun,
        pending: &PendingRecord,
        name: &str,
    ) -> Result<()> {
        for property in [LicenseProperty::LicenseUrl, LicenseProperty::LicenseContent] {
            let key = PropertyKey::license(name, property);
            let value = self.resolve_key(run, pending, &key).await?;
            if let Some(PropertyValue::Text(text)) = value {
                if property == LicenseProperty::LicenseUrl {
                    run.record_license_url(name, &text);
                }
                pending.set_license_field(name, property, text);
            }
        }
        Ok(())
    }

    async fn resolve_key(
        &self,
        run: &ResolutionRun,
        pending: &PendingRecord,
        key: &PropertyKey,
    ) -> Result<Option<PropertyValue>> {
        let _permit = run.permit().await?;

        for source in &self.sources {
            run.cancel().check()?;
            match source.fetch(run, key).await {
                Ok(None) => {}
                Ok(Some(value)) if value.is_unresolved() => {}
                Ok(Some(value)) => match self.banned.screen(key, value) {
                    Some(value) => {
                        debug!("{} {} resolved by {}", run.identity(), key, source.name());
                        return Ok(Some(value));
                    }
                    None => debug!(
                        "{} {}: ignoring placeholder from {}",
                        run.identity(),
                        key,
                        source.name()
                    ),
                },
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(
                        "{} {}: {} tier failed: {}",
                        run.identity(),
                        key,
                        source.name(),
                        e
                    );
                    pending.record_failure();
                }
            }
        }
        Ok(None)
    }
}
