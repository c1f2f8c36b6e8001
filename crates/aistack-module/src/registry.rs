//! [`Registry`] – multi-version store of checksum-verified module manifests.
//!
//! Each module name maps to every known [`ModuleRecord`] for it, kept sorted
//! by version, newest first.  Records are usually loaded from a directory
//! tree of `*.yaml` / `*.yml` manifests with [`Registry::load_from_dir`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::ModuleError;
use crate::manifest::{ModuleManifest, validate_manifest};
use crate::version::Version;

/// A validated manifest together with its parsed version and integrity data.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleRecord {
    pub manifest: ModuleManifest,
    pub version: Version,
    /// File the manifest was read from; `None` for in-memory manifests.
    pub source_path: Option<PathBuf>,
    /// SHA-256 of the raw manifest bytes, lowercase hex.
    pub checksum: String,
    pub signature: Option<String>,
}

impl ModuleRecord {
    /// Parse, validate and fingerprint raw manifest bytes.
    ///
    /// A checksum declared under `integrity.checksum` must equal the digest
    /// of `raw` (case-insensitive).
    pub fn from_yaml(raw: &str, source_path: Option<PathBuf>) -> Result<Self, ModuleError> {
        let manifest: ModuleManifest =
            serde_yaml::from_str(raw).map_err(|source| ModuleError::Parse {
                path: source_path
                    .as_deref()
                    .map_or_else(|| "<inline>".to_string(), |p| p.display().to_string()),
                source,
            })?;
        validate_manifest(&manifest)?;
        let version = Version::parse(&manifest.version)?;

        let checksum = compute_checksum(raw.as_bytes());
        if let Some(expected) = manifest.integrity.normalized_checksum()
            && !checksum.eq_ignore_ascii_case(expected)
        {
            return Err(ModuleError::ChecksumMismatch {
                name: manifest.name.clone(),
                expected: expected.to_string(),
                actual: checksum,
            });
        }

        Ok(Self {
            signature: manifest.integrity.signature.clone(),
            manifest,
            version,
            source_path,
            checksum,
        })
    }

    /// Read a manifest file and build its record.
    pub fn load(path: &Path) -> Result<Self, ModuleError> {
        let raw = fs::read_to_string(path).map_err(|source| ModuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw, Some(path.to_path_buf()))
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}

/// Hex-encoded SHA-256 digest.
pub fn compute_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Central module catalogue.
///
/// Construct with [`Registry::new`] and [`Registry::add`], or load a whole
/// manifest tree with [`Registry::load_from_dir`].
#[derive(Debug, Clone, Default)]
pub struct Registry {
    records: HashMap<String, Vec<ModuleRecord>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `root` recursively and register every `.yaml` / `.yml` manifest.
    ///
    /// # Errors
    ///
    /// The first unreadable, invalid or checksum-mismatched manifest aborts
    /// the load.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Self, ModuleError> {
        let root = root.as_ref();
        let mut registry = Self::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir).map_err(|source| ModuleError::Io {
                path: dir.clone(),
                source,
            })?;
            // Symlinked directories are not followed.
            let mut paths = entries
                .map(|entry| entry.and_then(|e| Ok((e.path(), e.file_type()?.is_dir()))))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| ModuleError::Io {
                    path: dir.clone(),
                    source,
                })?;
            paths.sort();

            for (path, is_dir) in paths {
                if is_dir {
                    pending.push(path);
                } else if is_manifest_file(&path) {
                    let record = ModuleRecord::load(&path)?;
                    debug!(
                        module = record.name(),
                        version = %record.version,
                        path = %path.display(),
                        "manifest loaded"
                    );
                    registry.add(record)?;
                }
            }
        }

        info!(
            root = %root.display(),
            modules = registry.len(),
            "module registry loaded"
        );
        Ok(registry)
    }

    /// Register a record, keeping that name's versions sorted newest first.
    pub fn add(&mut self, record: ModuleRecord) -> Result<(), ModuleError> {
        if record.manifest.name.is_empty() {
            return Err(ModuleError::MissingName);
        }
        let versions = self.records.entry(record.manifest.name.clone()).or_default();
        versions.push(record);
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(())
    }

    /// All versions of `name`, newest first.  Empty when unknown.
    pub fn get(&self, name: &str) -> &[ModuleRecord] {
        self.records.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Newest version of `name`.
    pub fn latest(&self, name: &str) -> Option<&ModuleRecord> {
        self.get(name).first()
    }

    /// Every record, keyed by module name.
    pub fn all(&self) -> &HashMap<String, Vec<ModuleRecord>> {
        &self.records
    }

    /// Registered module names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.records.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of distinct module names.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}
