//! Finalize stub generation
//!
//! The stub is a copy of a runner executable with the deferred manifest
//! appended as an overlay. It is archived as the last entry and, once the
//! archive is extracted, rewrites the deferred files for the actual location.

use crate::overlay::{OverlayReader, OverlayWriter};
use crate::rewrite::DeferredManifest;
use crate::{PackError, PackResult};
use std::path::{Path, PathBuf};

/// Archive path of the finalize entry
#[cfg(not(windows))]
pub const FINALIZE_ENTRY: &str = "bin/envpack-unpack";

/// Archive path of the finalize entry
#[cfg(windows)]
pub const FINALIZE_ENTRY: &str = "Scripts/envpack-unpack.exe";

/// Permission bits of the finalize entry
pub const FINALIZE_MODE: u32 = 0o755;

/// Builds finalize stubs from a runner executable
#[derive(Debug, Clone)]
pub struct StubGenerator {
    runner: PathBuf,
}

impl StubGenerator {
    /// Generator using `runner` as the executable part of the stub
    pub fn new(runner: impl Into<PathBuf>) -> Self {
        Self {
            runner: runner.into(),
        }
    }

    /// Generator using the currently running executable
    pub fn current_exe() -> PackResult<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Runner executable path
    pub fn runner(&self) -> &Path {
        &self.runner
    }

    /// Stub bytes for `manifest`.
    ///
    /// Any overlay already present on the runner is dropped first, so a stub
    /// can itself serve as the runner.
    pub fn generate(&self, manifest: &DeferredManifest) -> PackResult<Vec<u8>> {
        let runner = std::fs::read(&self.runner).map_err(|e| {
            PackError::Config(format!(
                "Cannot read finalize runner {}: {}",
                self.runner.display(),
                e
            ))
        })?;

        let mut stub = OverlayReader::strip(&runner).to_vec();
        OverlayWriter::append(&mut stub, manifest)?;

        tracing::debug!(
            "Finalize stub generated: runner={}, entries={}, size={} bytes",
            self.runner.display(),
            manifest.len(),
            stub.len()
        );

        Ok(stub)
    }
}
