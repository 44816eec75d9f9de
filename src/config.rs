//! Pack configuration types
//!
//! [`PackOptions`] is the explicit configuration of one pack run. It can be
//! built in code with the `with_*` methods or loaded from a TOML file:
//!
//! ```toml
//! prefix = "/opt/conda/envs/py311"
//! output = "py311.tar.gz"
//! dest_prefix = "/srv/py311"
//! jobs = 8
//!
//! [[filters]]
//! kind = "exclude"
//! pattern = "*.pyc"
//! ```

use crate::discovery::MissingCachePolicy;
use crate::{PackError, PackResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ============================================================================
// Archive Format
// ============================================================================

/// Container format of the output archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    /// Uncompressed tar
    #[serde(rename = "tar")]
    Tar,
    /// Gzip-compressed tar
    #[serde(rename = "tar.gz")]
    TarGz,
    /// Bzip2-compressed tar
    #[serde(rename = "tar.bz2")]
    TarBz2,
    /// Zip container
    #[serde(rename = "zip")]
    Zip,
}

impl ArchiveFormat {
    /// All supported formats
    pub const ALL: [ArchiveFormat; 4] = [
        ArchiveFormat::TarGz,
        ArchiveFormat::TarBz2,
        ArchiveFormat::Tar,
        ArchiveFormat::Zip,
    ];

    /// Canonical name, also the default file extension
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::TarBz2 => "tar.bz2",
            ArchiveFormat::Zip => "zip",
        }
    }

    /// Extensions recognised for this format
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            ArchiveFormat::Tar => &["tar"],
            ArchiveFormat::TarGz => &["tar.gz", "tgz"],
            ArchiveFormat::TarBz2 => &["tar.bz2", "tbz2"],
            ArchiveFormat::Zip => &["zip"],
        }
    }

    /// Parse a format name (`tgz` and `tbz2` are accepted aliases)
    pub fn parse(s: &str) -> PackResult<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.extensions().contains(&s.to_ascii_lowercase().as_str()))
            .ok_or_else(|| {
                PackError::Config(format!(
                    "Unknown archive format '{}', expected one of: tar.gz, tgz, tar.bz2, tbz2, tar, zip",
                    s
                ))
            })
    }

    /// Infer the format from a file name's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        // Longest extensions first so "x.tar.gz" is not read as "tar"
        let mut candidates: Vec<(ArchiveFormat, &str)> = Self::ALL
            .into_iter()
            .flat_map(|f| f.extensions().iter().map(move |e| (f, *e)))
            .collect();
        candidates.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        candidates
            .into_iter()
            .find(|(_, ext)| {
                name.strip_suffix(ext)
                    .is_some_and(|stem| stem.ends_with('.') && stem.len() > 1)
            })
            .map(|(f, _)| f)
    }

    /// Check if this is one of the tar-based formats
    pub fn is_tar(&self) -> bool {
        !matches!(self, ArchiveFormat::Zip)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveFormat {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Resolve the output path and format from the optional user choices.
///
/// - neither: `<name>.tar.gz`
/// - format only: `<name>.<format>`
/// - output only: format inferred from the extension, unknown extensions fail
/// - both: a recognised extension must agree with the format
pub fn output_and_format(
    name: &str,
    output: Option<&Path>,
    format: Option<&str>,
) -> PackResult<(PathBuf, ArchiveFormat)> {
    let format = format.map(ArchiveFormat::parse).transpose()?;

    match (output, format) {
        (None, None) => Ok((
            PathBuf::from(format!("{}.{}", name, ArchiveFormat::TarGz)),
            ArchiveFormat::TarGz,
        )),
        (None, Some(format)) => Ok((PathBuf::from(format!("{}.{}", name, format)), format)),
        (Some(output), None) => {
            let format = ArchiveFormat::from_path(output).ok_or_else(|| {
                PackError::Config(format!(
                    "Unknown file extension for output '{}', specify a format explicitly",
                    output.display()
                ))
            })?;
            Ok((output.to_path_buf(), format))
        }
        (Some(output), Some(format)) => match ArchiveFormat::from_path(output) {
            Some(inferred) if inferred != format => Err(PackError::Config(format!(
                "Output '{}' implies format '{}', which conflicts with requested format '{}'",
                output.display(),
                inferred,
                format
            ))),
            _ => Ok((output.to_path_buf(), format)),
        },
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Direction of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Re-add previously excluded files
    Include,
    /// Remove files
    Exclude,
}

impl FromStr for FilterKind {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "include" => Ok(FilterKind::Include),
            "exclude" => Ok(FilterKind::Exclude),
            other => Err(PackError::Config(format!(
                "Unknown filter kind '{}', expected 'include' or 'exclude'",
                other
            ))),
        }
    }
}

/// A validated filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Include or exclude
    pub kind: FilterKind,
    /// Glob pattern over archive paths
    pub pattern: String,
}

impl Filter {
    /// Exclude filter
    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            kind: FilterKind::Exclude,
            pattern: pattern.into(),
        }
    }

    /// Include filter
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            kind: FilterKind::Include,
            pattern: pattern.into(),
        }
    }
}

/// A filter as written by the user, validated when packing starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// `include` or `exclude`
    pub kind: String,
    /// Glob pattern over archive paths
    pub pattern: String,
}

impl FilterSpec {
    /// Create a filter spec
    pub fn new(kind: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            pattern: pattern.into(),
        }
    }

    /// Validate the kind
    pub fn parse(&self) -> PackResult<Filter> {
        Ok(Filter {
            kind: self.kind.parse()?,
            pattern: self.pattern.clone(),
        })
    }
}

// ============================================================================
// Pack Options
// ============================================================================

fn default_true() -> bool {
    true
}

/// Configuration of one pack run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackOptions {
    /// Environment name, resolved against `envs_dirs`
    #[serde(default)]
    pub name: Option<String>,

    /// Environment prefix
    #[serde(default)]
    pub prefix: Option<PathBuf>,

    /// Directories searched when packing by name
    #[serde(default)]
    pub envs_dirs: Vec<PathBuf>,

    /// Output archive path
    #[serde(default)]
    pub output: Option<PathBuf>,

    /// Archive format name
    #[serde(default)]
    pub format: Option<String>,

    /// Filters applied in order
    #[serde(default)]
    pub filters: Vec<FilterSpec>,

    /// Destination prefix, when known at packing time
    #[serde(default)]
    pub dest_prefix: Option<String>,

    /// Additional placeholders to look for
    #[serde(default)]
    pub extra_placeholders: Vec<String>,

    /// Allow zip64 extensions
    #[serde(default = "default_true")]
    pub zip64: bool,

    /// Overwrite an existing output
    #[serde(default)]
    pub force: bool,

    /// Maximum number of worker threads (default: available cores)
    #[serde(default)]
    pub jobs: Option<usize>,

    /// What to do when package cache entries are missing
    #[serde(default)]
    pub missing_cache: MissingCachePolicy,

    /// Executable used as the finalize stub runner (default: current executable)
    #[serde(default)]
    pub stub_runner: Option<PathBuf>,

    /// Show a progress bar
    #[serde(default)]
    pub show_progress: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            name: None,
            prefix: None,
            envs_dirs: Vec::new(),
            output: None,
            format: None,
            filters: Vec::new(),
            dest_prefix: None,
            extra_placeholders: Vec::new(),
            zip64: true,
            force: false,
            jobs: None,
            missing_cache: MissingCachePolicy::default(),
            stub_runner: None,
            show_progress: false,
        }
    }
}

impl PackOptions {
    /// Options packing the environment at `prefix`
    pub fn prefix(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    /// Options packing the environment called `name`
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Parse options from TOML
    pub fn from_toml(content: &str) -> PackResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load options from a TOML file; relative paths resolve against its directory
    pub fn load(path: &Path) -> PackResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut options = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            let resolve = |p: &mut PathBuf| {
                if p.is_relative() {
                    *p = base.join(&*p);
                }
            };
            options
                .prefix
                .iter_mut()
                .chain(options.output.iter_mut())
                .chain(options.stub_runner.iter_mut())
                .chain(options.envs_dirs.iter_mut())
                .for_each(resolve);
        }
        Ok(options)
    }

    /// Set the output path
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Set the archive format
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Append a filter
    pub fn with_filter(mut self, kind: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filters.push(FilterSpec::new(kind, pattern));
        self
    }

    /// Set the destination prefix
    pub fn with_dest_prefix(mut self, dest: impl Into<String>) -> Self {
        self.dest_prefix = Some(dest.into());
        self
    }

    /// Add a placeholder to look for
    pub fn with_extra_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.extra_placeholders.push(placeholder.into());
        self
    }

    /// Enable or disable zip64 extensions
    pub fn with_zip64(mut self, zip64: bool) -> Self {
        self.zip64 = zip64;
        self
    }

    /// Allow overwriting the output
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Bound the worker pool
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Add a directory searched when packing by name
    pub fn with_envs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.envs_dirs.push(dir.into());
        self
    }

    /// Set the missing package cache policy
    pub fn with_missing_cache(mut self, policy: MissingCachePolicy) -> Self {
        self.missing_cache = policy;
        self
    }

    /// Set the finalize stub runner executable
    pub fn with_stub_runner(mut self, runner: impl Into<PathBuf>) -> Self {
        self.stub_runner = Some(runner.into());
        self
    }

    /// Show a progress bar while packing
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Validated filters
    pub fn parsed_filters(&self) -> PackResult<Vec<Filter>> {
        self.filters.iter().map(FilterSpec::parse).collect()
    }

    /// Check option combinations that can be rejected without any file I/O
    pub fn validate(&self) -> PackResult<()> {
        if self.name.is_some() && self.prefix.is_some() {
            return Err(PackError::Config(
                "Cannot specify both an environment name and a prefix".to_string(),
            ));
        }
        if let Some(format) = &self.format {
            ArchiveFormat::parse(format)?;
        }
        self.parsed_filters()?;
        if let Some(dest) = &self.dest_prefix {
            if dest.is_empty() {
                return Err(PackError::Config("Destination prefix cannot be empty".to_string()));
            }
        }
        if self.jobs == Some(0) {
            return Err(PackError::Config("jobs must be at least 1".to_string()));
        }
        Ok(())
    }
}
