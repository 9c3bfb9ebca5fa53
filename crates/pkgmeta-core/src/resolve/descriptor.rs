//! Local package descriptor tier.
//!
//! Reads the `.nuspec` XML descriptor from the package's install directory.
//! The document is default-namespaced; lookups compare local names only.

use super::fs::{FileSystem, InstallPathResolver};
use super::run::ResolutionRun;
use super::source::{names_value, scalar_value, MetadataSource};
use crate::config::ResolverDefaults;
use crate::error::{MetadataError, Result};
use crate::license::{identifiers_in_order, LicenseClassifier};
use crate::model::{LicenseProperty, PackageIdentity, PackageProperty, PropertyKey, PropertyValue};
use async_trait::async_trait;
use roxmltree::{Document, Node};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

enum Lookup {
    Element(&'static str),
    Attribute(&'static str, &'static str),
}

/// Where each scalar property lives under `package/metadata`.
const DESCRIPTOR_FIELDS: &[(PackageProperty, Lookup)] = &[
    (PackageProperty::Title, Lookup::Element("title")),
    (PackageProperty::Authors, Lookup::Element("authors")),
    (PackageProperty::Owners, Lookup::Element("owners")),
    (PackageProperty::Description, Lookup::Element("description")),
    (PackageProperty::Summary, Lookup::Element("summary")),
    (PackageProperty::ProjectUrl, Lookup::Element("projectUrl")),
    (PackageProperty::RepositoryUrl, Lookup::Attribute("repository", "url")),
    (PackageProperty::IconUrl, Lookup::Element("iconUrl")),
    (PackageProperty::Tags, Lookup::Element("tags")),
    (PackageProperty::Copyright, Lookup::Element("copyright")),
    (PackageProperty::ReleaseNotes, Lookup::Element("releaseNotes")),
    (
        PackageProperty::RequireLicenseAcceptance,
        Lookup::Element("requireLicenseAcceptance"),
    ),
];

/// The parts of a descriptor the resolver reads, detached from the XML tree.
#[derive(Debug, Clone, Default)]
pub struct LocalDescriptor {
    package_dir: PathBuf,
    fields: HashMap<PackageProperty, String>,
    license_expression: Option<String>,
    license_file: Option<String>,
    license_url: Option<String>,
    /// Declared license names, worked out on first use.
    declared_licenses: OnceCell<Vec<String>>,
}

impl LocalDescriptor {
    /// Parse descriptor XML found in `package_dir`.
    pub fn parse(package_dir: &Path, xml: &str) -> Result<Self> {
        let document = Document::parse(xml)?;
        let root = document.root_element();
        if root.tag_name().name() != "package" {
            return Err(MetadataError::Descriptor {
                path: Some(package_dir.to_path_buf()),
                message: format!("unexpected root element <{}>", root.tag_name().name()),
            });
        }
        let metadata = child(root, "metadata").ok_or_else(|| MetadataError::Descriptor {
            path: Some(package_dir.to_path_buf()),
            message: "missing <metadata>".to_string(),
        })?;

        let mut fields = HashMap::new();
        for (property, lookup) in DESCRIPTOR_FIELDS {
            let value = match lookup {
                Lookup::Element(name) => child(metadata, name).and_then(text_of),
                Lookup::Attribute(name, attribute) => child(metadata, name)
                    .and_then(|node| node.attribute(*attribute))
                    .and_then(non_blank),
            };
            if let Some(value) = value {
                fields.insert(*property, value);
            }
        }

        let mut license_expression = None;
        let mut license_file = None;
        if let Some(license) = child(metadata, "license") {
            match license.attribute("type") {
                Some("expression") => license_expression = text_of(license),
                Some("file") => license_file = text_of(license),
                _ => {}
            }
        }

        Ok(Self {
            package_dir: package_dir.to_path_buf(),
            fields,
            license_expression,
            license_file,
            license_url: child(metadata, "licenseUrl").and_then(text_of),
            declared_licenses: OnceCell::new(),
        })
    }

    pub fn field(&self, property: PackageProperty) -> Option<&str> {
        self.fields.get(&property).map(String::as_str)
    }

    pub fn license_expression(&self) -> Option<&str> {
        self.license_expression.as_deref()
    }

    pub fn license_url(&self) -> Option<&str> {
        self.license_url.as_deref()
    }

    /// License file path, if it stays inside the package directory.
    pub fn license_file_path(&self) -> Option<PathBuf> {
        let relative = Path::new(self.license_file.as_deref()?);
        let contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        contained.then(|| self.package_dir.join(relative))
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn text_of(node: Node<'_, '_>) -> Option<String> {
    let text: String = node
        .descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect();
    non_blank(&text)
}

fn non_blank(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// First tier: the descriptor shipped inside the locally installed package.
pub struct LocalDescriptorSource {
    fs: Arc<dyn FileSystem>,
    paths: Arc<dyn InstallPathResolver>,
    classifier: Arc<dyn LicenseClassifier>,
}

impl LocalDescriptorSource {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        paths: Arc<dyn InstallPathResolver>,
        classifier: Arc<dyn LicenseClassifier>,
    ) -> Self {
        Self {
            fs,
            paths,
            classifier,
        }
    }

    async fn descriptor(&self, run: &ResolutionRun) -> Result<Option<Arc<LocalDescriptor>>> {
        run.descriptor(|| self.load(run.identity())).await
    }

    async fn load(&self, identity: &PackageIdentity) -> Result<Option<LocalDescriptor>> {
        let Some(package_dir) = self.paths.install_path(identity) else {
            return Ok(None);
        };
        if !self.fs.exists(&package_dir).await {
            debug!("{} is not installed locally", identity);
            return Ok(None);
        }

        let preferred = package_dir.join(format!(
            "{}.{}",
            identity.name().to_lowercase(),
            ResolverDefaults::DESCRIPTOR_EXTENSION
        ));
        let mut candidates = vec![preferred.clone()];
        candidates.extend(
            self.fs
                .list_dir(&package_dir)
                .await?
                .into_iter()
                .filter(|path| *path != preferred && is_descriptor(path)),
        );

        for candidate in candidates {
            if let Some(xml) = self.fs.read_to_string(&candidate).await? {
                debug!("Reading descriptor {}", candidate.display());
                return LocalDescriptor::parse(&package_dir, &xml)
                    .map(Some)
                    .map_err(|e| match e {
                        MetadataError::Descriptor { message, .. } => MetadataError::Descriptor {
                            path: Some(candidate.clone()),
                            message,
                        },
                        other => other,
                    });
            }
        }
        Ok(None)
    }

    /// License names declared by `descriptor`, classified once per descriptor.
    async fn license_names<'d>(&self, descriptor: &'d LocalDescriptor) -> Result<&'d [String]> {
        descriptor
            .declared_licenses
            .get_or_try_init(|| self.classify_licenses(descriptor))
            .await
            .map(Vec::as_slice)
    }

    async fn classify_licenses(&self, descriptor: &LocalDescriptor) -> Result<Vec<String>> {
        if let Some(expression) = descriptor.license_expression() {
            return Ok(identifiers_in_order(expression));
        }
        if let Some(path) = descriptor.license_file_path() {
            if let Some(content) = self.fs.read_to_string(&path).await? {
                let names = self.classifier.classify_text(&content);
                if !names.is_empty() {
                    return Ok(names);
                }
            }
        }
        Ok(descriptor
            .license_url()
            .map(|url| self.classifier.classify_url(url))
            .unwrap_or_default())
    }
}

fn is_descriptor(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case(ResolverDefaults::DESCRIPTOR_EXTENSION))
        .unwrap_or(false)
}

#[async_trait]
impl MetadataSource for LocalDescriptorSource {
    fn name(&self) -> &'static str {
        "local-descriptor"
    }

    async fn fetch(&self, run: &ResolutionRun, key: &PropertyKey) -> Result<Option<PropertyValue>> {
        let Some(descriptor) = self.descriptor(run).await? else {
            return Ok(None);
        };

        match key {
            PropertyKey::Package(PackageProperty::LicenseNames) => {
                Ok(names_value(self.license_names(&descriptor).await?.to_vec()))
            }
            PropertyKey::Package(property) => Ok(descriptor
                .field(*property)
                .and_then(|raw| scalar_value(key, raw))),
            PropertyKey::License { name, property } => {
                let declared = self.license_names(&descriptor).await?;
                if !declared.iter().any(|n| n == name) {
                    return Ok(None);
                }
                match property {
                    LicenseProperty::LicenseUrl => {
                        let Some(url) = descriptor.license_url() else {
                            return Ok(None);
                        };
                        let applies = declared.len() == 1
                            || url.to_lowercase().contains(&name.to_lowercase());
                        Ok(applies.then(|| PropertyValue::Text(url.to_string())))
                    }
                    LicenseProperty::LicenseContent => {
                        let Some(path) = descriptor.license_file_path() else {
                            return Ok(None);
                        };
                        Ok(self
                            .fs
                            .read_to_string(&path)
                            .await?
                            .and_then(|content| scalar_value(key, &content)))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::license::KnownLicenseClassifier;
    use crate::resolve::fs::GlobalPackagesLayout;
    use std::sync::Mutex;

    /// In-memory files that remember every read.
    #[derive(Default)]
    struct MemoryFs {
        files: HashMap<PathBuf, String>,
        reads: Mutex<Vec<PathBuf>>,
    }

    impl MemoryFs {
        fn reads_of(&self, path: &Path) -> usize {
            self.reads.lock().unwrap().iter().filter(|p| *p == path).count()
        }
    }

    #[async_trait]
    impl FileSystem for MemoryFs {
        async fn exists(&self, path: &Path) -> bool {
            self.files.keys().any(|file| file.starts_with(path))
        }

        async fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
            self.reads.lock().unwrap().push(path.to_path_buf());
            Ok(self.files.get(path).cloned())
        }

        async fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
            let mut entries: Vec<PathBuf> = self
                .files
                .keys()
                .filter(|file| file.parent() == Some(path))
                .cloned()
                .collect();
            entries.sort();
            Ok(entries)
        }
    }

    const NUSPEC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>Foo</id>
    <version>1.0.0</version>
    <title>Foo Library</title>
    <authors>Jane Doe</authors>
    <requireLicenseAcceptance>false</requireLicenseAcceptance>
    <license type="expression">MIT OR Apache-2.0</license>
    <licenseUrl>https://aka.ms/deprecateLicenseUrl</licenseUrl>
    <repository type="git" url="https://git.example/foo.git" />
    <description>
      Does foo things.
    </description>
    <tags>  </tags>
  </metadata>
</package>"#;

    #[test]
    fn test_parse_reads_namespaced_fields() {
        let descriptor = LocalDescriptor::parse(Path::new("/pkgs/foo/1.0.0"), NUSPEC).unwrap();
        assert_eq!(descriptor.field(PackageProperty::Title), Some("Foo Library"));
        assert_eq!(descriptor.field(PackageProperty::Authors), Some("Jane Doe"));
        assert_eq!(
            descriptor.field(PackageProperty::Description),
            Some("Does foo things.")
        );
        assert_eq!(
            descriptor.field(PackageProperty::RepositoryUrl),
            Some("https://git.example/foo.git")
        );
        assert_eq!(descriptor.field(PackageProperty::Tags), None);
        assert_eq!(descriptor.field(PackageProperty::Owners), None);
        assert_eq!(descriptor.license_expression(), Some("MIT OR Apache-2.0"));
        assert_eq!(
            descriptor.license_url(),
            Some("https://aka.ms/deprecateLicenseUrl")
        );
    }

    #[test]
    fn test_parse_rejects_other_documents() {
        let err = LocalDescriptor::parse(Path::new("/p"), "<project/>").unwrap_err();
        assert!(matches!(err, MetadataError::Descriptor { .. }));
        assert!(LocalDescriptor::parse(Path::new("/p"), "<package>").is_err());
    }

    #[test]
    fn test_license_file_stays_inside_package() {
        let xml = r#"<package><metadata><license type="file">docs/LICENSE.txt</license></metadata></package>"#;
        let descriptor = LocalDescriptor::parse(Path::new("/pkgs/foo/1.0.0"), xml).unwrap();
        assert_eq!(
            descriptor.license_file_path(),
            Some(PathBuf::from("/pkgs/foo/1.0.0/docs/LICENSE.txt"))
        );

        let escaping = r#"<package><metadata><license type="file">../../secret</license></metadata></package>"#;
        let descriptor = LocalDescriptor::parse(Path::new("/pkgs/foo/1.0.0"), escaping).unwrap();
        assert_eq!(descriptor.license_file_path(), None);
    }

    #[tokio::test]
    async fn test_license_file_is_classified_once_per_run() {
        let package_dir = PathBuf::from("/pkgs/foo/1.0.0");
        let license_path = package_dir.join("LICENSE.txt");
        let mut fs = MemoryFs::default();
        fs.files.insert(
            package_dir.join("foo.nuspec"),
            r#"<package><metadata><license type="file">LICENSE.txt</license></metadata></package>"#
                .to_string(),
        );
        fs.files.insert(
            license_path.clone(),
            "SPDX-License-Identifier: MIT\n\nPermission is hereby granted".to_string(),
        );
        let fs = Arc::new(fs);
        let source = LocalDescriptorSource::new(
            fs.clone(),
            Arc::new(GlobalPackagesLayout::new("/pkgs")),
            Arc::new(KnownLicenseClassifier),
        );
        let run = ResolutionRun::new(PackageIdentity::new("Foo", "1.0.0"), CancellationToken::new(), 1);

        let names = source
            .fetch(&run, &PropertyKey::Package(PackageProperty::LicenseNames))
            .await
            .unwrap();
        assert_eq!(names, Some(PropertyValue::Names(vec!["MIT".into()])));
        assert_eq!(fs.reads_of(&license_path), 1);

        let url = source
            .fetch(&run, &PropertyKey::license("MIT", LicenseProperty::LicenseUrl))
            .await
            .unwrap();
        assert_eq!(url, None);
        assert_eq!(fs.reads_of(&license_path), 1);

        let content = source
            .fetch(&run, &PropertyKey::license("MIT", LicenseProperty::LicenseContent))
            .await
            .unwrap();
        assert!(matches!(content, Some(PropertyValue::Text(text)) if text.starts_with("SPDX")));
        // The content lookup itself is the only extra read
        assert_eq!(fs.reads_of(&license_path), 2);
    }
}
