//! Deferred rewrite at first run
//!
//! A [`Finalizer`] applies a [`DeferredManifest`] to an extracted
//! environment. The root is the directory the archive was extracted into;
//! each manifest entry is rewritten with the same text or length-preserving
//! binary substitution the packer would have used had it known the root.
//!
//! A marker file records the root a tree was finalized for. Running again at
//! the same root does nothing; running after the tree was moved fails, since
//! the original placeholders are gone.

use crate::overlay::OverlayReader;
use crate::rewrite::{replace_prefix, DeferredManifest, FileMode};
use crate::{PackError, PackResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Marker written at the root once finalization succeeds
pub const FINALIZED_MARKER: &str = ".envpack-finalized";

/// Outcome of a finalize run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    /// Root the environment was finalized for
    pub root: PathBuf,
    /// Number of files rewritten by this run
    pub rewritten: usize,
    /// Whether the tree had already been finalized at this root
    pub already_finalized: bool,
}

/// Applies deferred rewrites to an extracted environment
#[derive(Debug, Clone)]
pub struct Finalizer {
    root: PathBuf,
    manifest: DeferredManifest,
}

impl Finalizer {
    /// Create a finalizer for the environment extracted at `root`
    pub fn new(root: impl Into<PathBuf>, manifest: DeferredManifest) -> Self {
        Self {
            root: root.into(),
            manifest,
        }
    }

    /// Finalizer for the stub at `exe`, whose root is two levels up
    pub fn from_stub(exe: &Path) -> PackResult<Option<Self>> {
        let Some(manifest) = OverlayReader::read(exe)? else {
            return Ok(None);
        };
        let exe = fs::canonicalize(exe)?;
        let root = exe
            .parent()
            .and_then(Path::parent)
            .ok_or_else(|| {
                PackError::Config(format!(
                    "Cannot determine environment root from {}",
                    exe.display()
                ))
            })?
            .to_path_buf();
        Ok(Some(Self::new(root, manifest)))
    }

    /// Environment root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Manifest being applied
    pub fn manifest(&self) -> &DeferredManifest {
        &self.manifest
    }

    /// Rewrite every manifest entry for the root.
    ///
    /// Length checks for binary entries run before any file is touched.
    pub fn run(&self) -> PackResult<FinalizeReport> {
        let destination = root_string(&self.root);
        let marker = self.root.join(FINALIZED_MARKER);

        if let Some(previous) = read_marker(&marker)? {
            if previous == destination {
                tracing::debug!("Already finalized at {}", destination);
                return Ok(FinalizeReport {
                    root: self.root.clone(),
                    rewritten: 0,
                    already_finalized: true,
                });
            }
            return Err(PackError::Config(format!(
                "Environment was finalized at {} and has since moved to {}; extract the archive again instead",
                previous, destination
            )));
        }

        if let Some(entry) = self
            .manifest
            .iter()
            .find(|e| e.mode == FileMode::Binary && destination.len() > e.placeholder.len())
        {
            return Err(PackError::PlaceholderTooLong {
                path: entry.target.clone(),
                placeholder: entry.placeholder.clone(),
                destination,
            });
        }

        for entry in self.manifest.iter() {
            let path = self.root.join(&entry.target);
            let data = fs::read(&path).map_err(|e| PackError::unreadable(&path, e))?;
            let rewritten =
                replace_prefix(&entry.target, entry.mode, &data, &entry.placeholder, &destination)?;
            if rewritten != data {
                fs::write(&path, rewritten)?;
            }
            tracing::debug!("Finalized {} ({:?})", entry.target, entry.mode);
        }

        fs::write(&marker, &destination)?;
        tracing::info!(
            "Finalized {} files for {}",
            self.manifest.len(),
            destination
        );

        Ok(FinalizeReport {
            root: self.root.clone(),
            rewritten: self.manifest.len(),
            already_finalized: false,
        })
    }
}

/// Finalize the environment around the running executable.
///
/// Returns `None` when the executable carries no manifest.
pub fn run_from_current_exe() -> PackResult<Option<FinalizeReport>> {
    let exe = std::env::current_exe()?;
    match Finalizer::from_stub(&exe)? {
        Some(finalizer) => finalizer.run().map(Some),
        None => Ok(None),
    }
}

fn root_string(root: &Path) -> String {
    let root = root.to_string_lossy();
    let trimmed = root.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        root.into_owned()
    } else {
        trimmed.to_string()
    }
}

fn read_marker(marker: &Path) -> PackResult<Option<String>> {
    match fs::read_to_string(marker) {
        Ok(content) => Ok(Some(content.trim_end().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PackError::unreadable(marker, e)),
    }
}
