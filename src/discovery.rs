//! Environment discovery
//!
//! [`Discover`] is the seam between an installer's metadata store and the
//! packing engine. [`PrefixScanner`] implements it for conda-style prefixes,
//! where every installed package has a JSON record under `conda-meta/`:
//!
//! ```json
//! {
//!   "name": "zlib",
//!   "extracted_package_dir": "/opt/conda/pkgs/zlib-1.2.13-h5eee18b_0",
//!   "files": ["lib/libz.so.1"],
//!   "paths_data": {
//!     "paths": [
//!       { "_path": "lib/libz.so.1", "prefix_placeholder": "/opt/anaconda1anaconda2anaconda3" }
//!     ]
//!   }
//! }
//! ```
//!
//! Files listed with a `prefix_placeholder` are packed from the package cache
//! when `extracted_package_dir` still exists: the cached copy holds the long
//! build placeholder rather than the installation prefix, which leaves room for
//! length-preserving binary rewrites. Without the cache the installed copy is
//! packed and a [`CacheWarning`] is reported.

use crate::file::normalize_target;
use crate::finalize::FINALIZED_MARKER;
use crate::{PackError, PackResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// Directory holding install records
pub const META_DIR: &str = "conda-meta";

/// Files never packed
const SKIPPED: &[&str] = &["conda-meta/history", FINALIZED_MARKER];

/// Package-manager entry points left behind by the base installation; packed
/// only when a record of this environment owns them
const FOREIGN_ENTRY_POINTS: &[&str] = &[
    "bin/conda",
    "bin/activate",
    "bin/deactivate",
    "Scripts/conda.exe",
    "Scripts/activate.bat",
    "Scripts/deactivate.bat",
    "Scripts/activate",
    "Scripts/deactivate",
];

/// One file found by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path on disk
    pub source: PathBuf,
    /// Path inside the archive
    pub target: String,
    /// Whether an install record lists the file
    pub is_managed: bool,
}

/// A package whose cached copy is missing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheWarning {
    /// Package name
    pub package: String,
    /// Expected cache location
    pub path: PathBuf,
}

impl fmt::Display for CacheWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Package cache for '{}' is missing at {}; files are packed from the environment as-is",
            self.package,
            self.path.display()
        )
    }
}

/// What to do when package cache entries are missing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingCachePolicy {
    /// Report a [`CacheWarning`] and continue
    #[default]
    Warn,
    /// Fail with [`PackError::MissingPackageCache`]
    Raise,
}

impl FromStr for MissingCachePolicy {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warn" => Ok(MissingCachePolicy::Warn),
            "raise" => Ok(MissingCachePolicy::Raise),
            other => Err(PackError::Config(format!(
                "Unknown missing cache policy '{}', expected 'warn' or 'raise'",
                other
            ))),
        }
    }
}

/// Result of discovering an environment
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    /// Environment name
    pub name: String,
    /// Absolute installation prefix
    pub prefix: String,
    /// Files in a stable order
    pub files: Vec<DiscoveredFile>,
    /// Placeholders declared by install records
    pub placeholders: Vec<String>,
    /// Non-fatal problems
    pub warnings: Vec<CacheWarning>,
}

/// Source of an environment's file list
pub trait Discover {
    /// Enumerate the environment
    fn discover(&self) -> PackResult<Discovered>;
}

#[derive(Debug, Deserialize)]
struct PackageRecord {
    name: String,
    #[serde(default)]
    extracted_package_dir: Option<PathBuf>,
    #[serde(default)]
    files: Vec<String>,
    #[serde(default)]
    paths_data: Option<PathsData>,
}

#[derive(Debug, Deserialize)]
struct PathsData {
    #[serde(default)]
    paths: Vec<PathEntry>,
}

#[derive(Debug, Deserialize)]
struct PathEntry {
    #[serde(rename = "_path")]
    path: String,
    #[serde(default)]
    prefix_placeholder: Option<String>,
}

impl PackageRecord {
    fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.iter().map(|p| normalize_target(p)).collect();
        if let Some(data) = &self.paths_data {
            paths.extend(data.paths.iter().map(|p| normalize_target(&p.path)));
        }
        paths.sort();
        paths.dedup();
        paths
    }

    fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholder_paths().map(|(_, placeholder)| placeholder)
    }

    /// Paths whose installed copy had a placeholder substituted, with that placeholder
    fn placeholder_paths(&self) -> impl Iterator<Item = (&str, &str)> {
        self.paths_data
            .iter()
            .flat_map(|d| d.paths.iter())
            .filter_map(|p| Some((p.path.as_str(), p.prefix_placeholder.as_deref()?)))
    }
}

/// Discovers a conda-style environment installed at a prefix
#[derive(Debug, Clone)]
pub struct PrefixScanner {
    prefix: PathBuf,
    missing_cache: MissingCachePolicy,
}

impl PrefixScanner {
    /// Scanner for the environment at `prefix`
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            missing_cache: MissingCachePolicy::default(),
        }
    }

    /// Set the missing package cache policy
    pub fn with_missing_cache(mut self, policy: MissingCachePolicy) -> Self {
        self.missing_cache = policy;
        self
    }

    fn read_records(&self, meta: &Path) -> PackResult<Vec<PackageRecord>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(meta)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        paths
            .iter()
            .map(|path| {
                let content = fs::read(path).map_err(|e| PackError::unreadable(path, e))?;
                serde_json::from_slice(&content).map_err(|e| {
                    tracing::error!("Invalid install record {}: {}", path.display(), e);
                    PackError::NotAnEnvironment(path.clone())
                })
            })
            .collect()
    }
}

impl Discover for PrefixScanner {
    fn discover(&self) -> PackResult<Discovered> {
        if !self.prefix.exists() {
            return Err(PackError::EnvironmentNotFound(
                self.prefix.display().to_string(),
            ));
        }
        let prefix = std::path::absolute(&self.prefix)?;
        let meta = prefix.join(META_DIR);
        if !meta.is_dir() {
            return Err(PackError::NotAnEnvironment(prefix));
        }

        let records = self.read_records(&meta)?;

        let mut owners: BTreeMap<String, &str> = BTreeMap::new();
        let mut placeholders = BTreeSet::new();
        let mut warnings = Vec::new();
        let mut cached: BTreeMap<String, PathBuf> = BTreeMap::new();
        for record in &records {
            for path in record.paths() {
                if let Some(owner) = owners.insert(path.clone(), &record.name) {
                    if owner != record.name {
                        return Err(PackError::OverlappingInstalls {
                            path,
                            owners: vec![owner.to_string(), record.name.clone()],
                        });
                    }
                }
            }
            placeholders.extend(record.placeholders().map(str::to_string));

            if let Some(dir) = &record.extracted_package_dir {
                if dir.is_dir() {
                    // The cached copy still embeds the placeholder
                    for (path, _) in record.placeholder_paths() {
                        cached.insert(normalize_target(path), dir.join(path));
                    }
                } else {
                    warnings.push(CacheWarning {
                        package: record.name.clone(),
                        path: dir.clone(),
                    });
                }
            }
        }

        if !warnings.is_empty() && self.missing_cache == MissingCachePolicy::Raise {
            return Err(PackError::MissingPackageCache(
                warnings.into_iter().map(|w| w.package).collect(),
            ));
        }
        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        let mut files = Vec::new();
        let mut editable = Vec::new();
        for entry in WalkDir::new(&prefix)
            .follow_links(false)
            .sort_by_file_name()
            .min_depth(1)
        {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| prefix.clone());
                PackError::unreadable(path, e.into())
            })?;
            if entry.file_type().is_dir() {
                continue;
            }

            let relative = entry.path().strip_prefix(&prefix).unwrap_or(entry.path());
            let target = normalize_target(&relative.to_string_lossy());
            let is_managed = owners.contains_key(&target);
            if SKIPPED.contains(&target.as_str())
                || (!is_managed && FOREIGN_ENTRY_POINTS.contains(&target.as_str()))
            {
                tracing::debug!("Skipping {}", target);
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if file_name.ends_with(".egg-link") || file_name.starts_with("__editable__") {
                editable.push(target);
                continue;
            }

            let source = match cached.get(&target) {
                Some(copy) if is_managed && entry.file_type().is_file() && copy.is_file() => {
                    tracing::debug!("{}: packing cached copy {}", target, copy.display());
                    copy.clone()
                }
                _ => entry.path().to_path_buf(),
            };
            files.push(DiscoveredFile {
                source,
                is_managed,
                target,
            });
        }

        if !editable.is_empty() {
            return Err(PackError::EditableInstalls(editable));
        }

        let prefix_str = prefix.to_string_lossy().to_string();
        let name = prefix
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| prefix_str.clone());

        tracing::info!(
            "Discovered {}: {} files ({} managed), {} packages",
            name,
            files.len(),
            files.iter().filter(|f| f.is_managed).count(),
            records.len()
        );

        Ok(Discovered {
            name,
            prefix: prefix_str,
            files,
            placeholders: placeholders.into_iter().collect(),
            warnings,
        })
    }
}

/// Resolves environment names against a list of directories
#[derive(Debug, Clone, Default)]
pub struct EnvLocator {
    envs_dirs: Vec<PathBuf>,
}

impl EnvLocator {
    /// Locator searching `envs_dirs` in order
    pub fn new(envs_dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            envs_dirs: envs_dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Directories searched
    pub fn envs_dirs(&self) -> &[PathBuf] {
        &self.envs_dirs
    }

    /// Prefix of the environment called `name`
    pub fn locate(&self, name: &str) -> PackResult<PathBuf> {
        self.envs_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|prefix| prefix.join(META_DIR).is_dir())
            .ok_or_else(|| {
                PackError::EnvironmentNotFound(format!(
                    "Failed to determine path to environment '{}' (searched {} directories)",
                    name,
                    self.envs_dirs.len()
                ))
            })
    }
}
