//! Manifest sources
//!
//! A [`ManifestSource`] lists the alveoli it knows about and loads their
//! definitions and raw descriptor contents. Every call is idempotent.
//!
//! - [`FilesystemSource`]: ordered bundle directories, first match wins
//! - [`InMemorySource`]: definitions registered programmatically

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::manifest::{Alveolus, AlveolusId, Manifest};

/// File names recognized as a bundle manifest, in lookup order
pub const MANIFEST_FILES: &[&str] = &["manifest.json", "manifest.yaml", "manifest.yml"];

/// Directory holding descriptor files inside a bundle
pub const DESCRIPTORS_DIR: &str = "kubernetes";

/// Serialization of a descriptor file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    Yaml,
    Json,
}

impl DescriptorFormat {
    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// Raw, not yet rendered, descriptor content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDescriptor {
    pub name: String,
    pub content: String,
    pub format: DescriptorFormat,
}

/// Content source for alveolus definitions
pub trait ManifestSource: Send + Sync {
    /// Known alveoli, in discovery order
    fn list(&self) -> Result<Vec<AlveolusId>>;

    /// Load an alveolus; any version matches when `version` is `None`
    fn load(&self, name: &str, version: Option<&str>) -> Result<Alveolus>;

    /// Load the raw content of one of the alveolus descriptors
    fn descriptor(&self, alveolus: &AlveolusId, descriptor: &str) -> Result<RawDescriptor>;
}

#[derive(Debug, Clone)]
struct Bundle {
    root: PathBuf,
    manifest: Manifest,
}

/// Bundles read from directories on disk
#[derive(Debug, Clone, Default)]
pub struct FilesystemSource {
    bundles: Vec<Bundle>,
}

impl FilesystemSource {
    /// Open bundle roots in order.
    ///
    /// A root is either a bundle (it holds a manifest file) or a directory whose
    /// direct children are bundles, visited in file name order.
    pub fn open<P: AsRef<Path>>(roots: &[P]) -> Result<Self> {
        let mut bundles = Vec::new();
        for root in roots {
            let root = root.as_ref();
            if !root.is_dir() {
                return Err(CoreError::ManifestNotFound {
                    path: root.display().to_string(),
                });
            }

            if let Some(manifest) = find_manifest(root) {
                bundles.push(Bundle {
                    root: root.to_path_buf(),
                    manifest: Manifest::load(&manifest)?,
                });
                continue;
            }

            for entry in walkdir::WalkDir::new(root)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_dir() {
                    continue;
                }
                if let Some(manifest) = find_manifest(entry.path()) {
                    tracing::debug!(bundle = %entry.path().display(), "discovered bundle");
                    bundles.push(Bundle {
                        root: entry.path().to_path_buf(),
                        manifest: Manifest::load(&manifest)?,
                    });
                }
            }
        }
        Ok(Self { bundles })
    }

    /// Number of bundles found
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    fn find(&self, name: &str, version: Option<&str>) -> Option<(&Bundle, &Alveolus)> {
        self.bundles.iter().find_map(|bundle| {
            bundle
                .manifest
                .alveoli
                .iter()
                .find(|a| a.matches(name, version))
                .map(|a| (bundle, a))
        })
    }
}

fn find_manifest(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

impl ManifestSource for FilesystemSource {
    fn list(&self) -> Result<Vec<AlveolusId>> {
        Ok(self
            .bundles
            .iter()
            .flat_map(|b| b.manifest.alveoli.iter().map(Alveolus::id))
            .collect())
    }

    fn load(&self, name: &str, version: Option<&str>) -> Result<Alveolus> {
        self.find(name, version)
            .map(|(_, alveolus)| alveolus.clone())
            .ok_or_else(|| CoreError::AlveolusNotFound {
                name: name.to_string(),
                version: version.map(str::to_string),
            })
    }

    fn descriptor(&self, alveolus: &AlveolusId, descriptor: &str) -> Result<RawDescriptor> {
        let (bundle, _) = self
            .find(&alveolus.name, alveolus.version.as_deref())
            .ok_or_else(|| CoreError::AlveolusNotFound {
                name: alveolus.name.clone(),
                version: alveolus.version.clone(),
            })?;

        let dir = bundle.root.join(DESCRIPTORS_DIR);
        let candidates: Vec<PathBuf> = if has_descriptor_extension(descriptor) {
            vec![dir.join(descriptor)]
        } else {
            ["yaml", "yml", "json"]
                .iter()
                .map(|ext| dir.join(format!("{descriptor}.{ext}")))
                .collect()
        };

        let path = candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| CoreError::DescriptorNotFound {
                alveolus: alveolus.to_string(),
                descriptor: descriptor.to_string(),
            })?;

        Ok(RawDescriptor {
            name: descriptor.to_string(),
            content: std::fs::read_to_string(&path)?,
            format: DescriptorFormat::from_path(&path),
        })
    }
}

fn has_descriptor_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml") || lower.ends_with(".json")
}

/// Definitions held in memory, mostly for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    alveoli: Vec<Alveolus>,
    descriptors: HashMap<(String, String), RawDescriptor>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alveolus(mut self, alveolus: Alveolus) -> Self {
        self.alveoli.push(alveolus);
        self
    }

    /// Register descriptor content for an alveolus name (YAML unless it parses as a JSON object)
    pub fn with_descriptor(
        mut self,
        alveolus: &str,
        descriptor: &str,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let format = if content.trim_start().starts_with('{') {
            DescriptorFormat::Json
        } else {
            DescriptorFormat::Yaml
        };
        self.descriptors.insert(
            (alveolus.to_string(), descriptor.to_string()),
            RawDescriptor {
                name: descriptor.to_string(),
                content,
                format,
            },
        );
        self
    }
}

impl ManifestSource for InMemorySource {
    fn list(&self) -> Result<Vec<AlveolusId>> {
        Ok(self.alveoli.iter().map(Alveolus::id).collect())
    }

    fn load(&self, name: &str, version: Option<&str>) -> Result<Alveolus> {
        self.alveoli
            .iter()
            .find(|a| a.matches(name, version))
            .cloned()
            .ok_or_else(|| CoreError::AlveolusNotFound {
                name: name.to_string(),
                version: version.map(str::to_string),
            })
    }

    fn descriptor(&self, alveolus: &AlveolusId, descriptor: &str) -> Result<RawDescriptor> {
        self.descriptors
            .get(&(alveolus.name.clone(), descriptor.to_string()))
            .cloned()
            .ok_or_else(|| CoreError::DescriptorNotFound {
                alveolus: alveolus.to_string(),
                descriptor: descriptor.to_string(),
            })
    }
}
