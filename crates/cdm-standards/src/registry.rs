#![deny(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use cdm_model::{CaseInsensitiveSet, CdmError, TableDefinition};
use tracing::debug;

use crate::error::StandardsError;
use crate::hash::sha256_hex;
use crate::loaders::load_table_definitions;
use crate::manifest::{MANIFEST_SCHEMA, Manifest, ManifestFile};
use crate::paths::standards_root;

/// The table definitions of one CDM version.
#[derive(Debug, Clone)]
pub struct SchemaVersion {
    name: String,
    tables: Vec<TableDefinition>,
    index: CaseInsensitiveSet,
}

impl SchemaVersion {
    pub fn new(name: impl Into<String>, tables: Vec<TableDefinition>) -> Self {
        let index = CaseInsensitiveSet::new(tables.iter().map(|t| t.name.as_str()));
        Self {
            name: name.into(),
            tables,
            index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a table definition by name, ignoring case.
    pub fn table(&self, name: &str) -> Result<&TableDefinition, CdmError> {
        self.index
            .get(name)
            .and_then(|actual| self.tables.iter().find(|t| t.name == actual))
            .ok_or_else(|| CdmError::UnknownTable {
                table: name.to_string(),
                version: self.name.clone(),
            })
    }

    pub fn tables(&self) -> &[TableDefinition] {
        &self.tables
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn identity_table(&self) -> Option<&TableDefinition> {
        self.tables.iter().find(|t| t.is_identity)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifySummary {
    pub standards_dir: PathBuf,
    pub file_count: usize,
    pub version_count: usize,
    pub table_count: usize,
    pub field_count: usize,
}

/// All schema versions shipped under the standards directory.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    versions: BTreeMap<String, SchemaVersion>,
    default_version: String,
}

impl SchemaRegistry {
    pub fn from_versions(versions: Vec<SchemaVersion>, default_version: &str) -> Self {
        let versions = versions
            .into_iter()
            .map(|v| (v.name.clone(), v))
            .collect();
        Self {
            versions,
            default_version: default_version.to_string(),
        }
    }

    /// Loads the registry from the default standards root without hash checks.
    pub fn load_default() -> Result<Self, StandardsError> {
        Self::load(&standards_root())
    }

    pub fn load(standards_dir: &Path) -> Result<Self, StandardsError> {
        let manifest = load_manifest(&standards_dir.join("manifest.toml"))?;
        validate_manifest(&manifest)?;
        Self::from_manifest(standards_dir, &manifest)
    }

    /// Loads the registry after checking every manifest file against its sha256.
    pub fn verify_and_load(standards_dir: &Path) -> Result<(Self, VerifySummary), StandardsError> {
        let manifest = load_manifest(&standards_dir.join("manifest.toml"))?;
        validate_manifest(&manifest)?;

        let mut files = manifest.files.clone();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        for file in &files {
            verify_file(standards_dir, file)?;
        }

        let registry = Self::from_manifest(standards_dir, &manifest)?;
        let summary = VerifySummary {
            standards_dir: standards_dir.to_path_buf(),
            file_count: files.len(),
            version_count: registry.versions.len(),
            table_count: registry.versions.values().map(|v| v.tables.len()).sum(),
            field_count: registry
                .versions
                .values()
                .flat_map(|v| v.tables.iter())
                .map(|t| t.fields.len())
                .sum(),
        };
        Ok((registry, summary))
    }

    fn from_manifest(standards_dir: &Path, manifest: &Manifest) -> Result<Self, StandardsError> {
        let mut versions = Vec::new();
        for entry in &manifest.versions {
            let dir = standards_dir.join(validate_path(&entry.dir)?);
            let tables = load_table_definitions(&dir)?;
            debug!(
                version = %entry.name,
                table_count = tables.len(),
                dir = %dir.display(),
                "loaded schema version"
            );
            versions.push(SchemaVersion::new(entry.name.clone(), tables));
        }
        let default_version = manifest
            .versions
            .iter()
            .find(|v| v.default)
            .or_else(|| manifest.versions.first())
            .map(|v| v.name.clone())
            .unwrap_or_default();
        Ok(Self::from_versions(versions, &default_version))
    }

    pub fn version(&self, name: &str) -> Result<&SchemaVersion, CdmError> {
        self.versions.get(name).ok_or_else(|| CdmError::UnknownVersion {
            version: name.to_string(),
            available: self.version_names().join(", "),
        })
    }

    pub fn default_version(&self) -> Result<&SchemaVersion, CdmError> {
        self.version(&self.default_version)
    }

    pub fn version_names(&self) -> Vec<&str> {
        self.versions.keys().map(String::as_str).collect()
    }
}

fn load_manifest(path: &Path) -> Result<Manifest, StandardsError> {
    let contents = std::fs::read_to_string(path).map_err(|e| StandardsError::io(path, e))?;
    toml::from_str(&contents).map_err(|e| StandardsError::Toml {
        path: path.to_path_buf(),
        source: e,
    })
}

fn validate_manifest(manifest: &Manifest) -> Result<(), StandardsError> {
    if manifest.manifest.schema != MANIFEST_SCHEMA {
        return Err(StandardsError::InvalidManifest {
            message: format!("unsupported schema: {}", manifest.manifest.schema),
        });
    }
    if manifest.manifest.schema_version != 1 {
        return Err(StandardsError::InvalidManifest {
            message: format!(
                "unsupported schema_version: {}",
                manifest.manifest.schema_version
            ),
        });
    }
    if manifest.versions.is_empty() {
        return Err(StandardsError::InvalidManifest {
            message: "no schema versions declared".to_string(),
        });
    }
    if manifest.versions.iter().filter(|v| v.default).count() > 1 {
        return Err(StandardsError::InvalidManifest {
            message: "more than one default version".to_string(),
        });
    }

    let declared: BTreeSet<&str> = manifest.versions.iter().map(|v| v.name.as_str()).collect();
    for file in &manifest.files {
        if !declared.contains(file.version.as_str()) {
            return Err(StandardsError::InvalidManifest {
                message: format!("{} references undeclared version {}", file.path, file.version),
            });
        }
        validate_sha(&file.sha256, &file.path)?;
        validate_path(&file.path)?;
    }
    Ok(())
}

fn validate_sha(sha: &str, path: &str) -> Result<(), StandardsError> {
    if sha.len() != 64 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(StandardsError::InvalidManifest {
            message: format!("invalid sha256 for {path}"),
        });
    }
    Ok(())
}

/// Rejects absolute paths and parent traversal in manifest entries.
fn validate_path(raw: &str) -> Result<PathBuf, StandardsError> {
    let path = PathBuf::from(raw);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(StandardsError::InvalidManifest {
            message: format!("path must stay inside the standards directory: {raw}"),
        });
    }
    Ok(path)
}

fn verify_file(standards_dir: &Path, file: &ManifestFile) -> Result<(), StandardsError> {
    let full_path = standards_dir.join(&file.path);
    let bytes = std::fs::read(&full_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StandardsError::MissingFile {
                path: full_path.clone(),
            }
        } else {
            StandardsError::io(full_path.clone(), e)
        }
    })?;

    let actual = sha256_hex(&bytes);
    let expected = file.sha256.to_ascii_lowercase();
    if actual != expected {
        return Err(StandardsError::Sha256Mismatch {
            path: full_path,
            expected,
            actual,
        });
    }
    Ok(())
}
