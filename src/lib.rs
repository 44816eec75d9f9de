//! envpack - Relocatable Environment Archives
//!
//! This crate packs an installed runtime environment (a directory tree whose
//! files embed their own absolute installation path) into an archive that can
//! be extracted at a different, unknown path and still work.
//!
//! # How It Works
//!
//! 1. Every file is classified as text, binary, or unknown
//! 2. Text and binary files are searched for the installation prefix and any
//!    placeholders declared by the installer's records
//! 3. When the destination is known, occurrences are rewritten while packing
//!    (binary strings keep their length and are padded with NUL bytes)
//! 4. Otherwise the rewrites are recorded in a manifest, and a finalize stub
//!    is added to the archive that performs them after extraction, together
//!    with `activate` / `deactivate` scripts that work from any location
//!
//! # Quick Start
//!
//! ## Command Line Usage
//!
//! ```bash
//! # Pack by prefix, rewrite on first run
//! envpack pack --prefix /opt/conda/envs/py311 --output py311.tar.gz
//!
//! # Destination known at packing time
//! envpack pack --name py311 --envs-dir /opt/conda/envs --dest-prefix /srv/py311
//!
//! # After extraction
//! tar -xzf py311.tar.gz -C /somewhere/py311
//! /somewhere/py311/bin/envpack-unpack
//! ```
//!
//! ## Library Usage
//!
//! ```no_run
//! use envpack::{PackOptions, Packer};
//!
//! let options = PackOptions::prefix("/opt/conda/envs/py311")
//!     .with_output("py311.zip")
//!     .with_filter("exclude", "*.pyc");
//! let output = Packer::new(options).pack()?;
//! println!("{} files, {} deferred", output.file_count, output.deferred);
//! # Ok::<(), envpack::PackError>(())
//! ```
//!
//! # Technical Details
//!
//! ## Finalize Stub
//!
//! The stub is the `envpack` executable itself with the manifest appended:
//! ```text
//! [envpack executable]
//! [Overlay Data]
//!   - Magic: "EPAK" (4 bytes)
//!   - Version: u32 (4 bytes)
//!   - Manifest Length: u64 (8 bytes)
//!   - Manifest JSON (zstd compressed, with BLAKE3 content hash)
//! [Footer]
//!   - Overlay Offset: u64 (8 bytes)
//!   - Magic: "EPAK" (4 bytes)
//! ```

mod activate;
pub mod archive;
mod config;
pub mod discovery;
mod env;
mod error;
mod file;
pub mod finalize;
mod overlay;
mod packer;
mod prefix;
pub mod progress;
pub mod rewrite;
mod stub;

// Re-export public API
pub use activate::{activation_scripts, SCRIPT_MODE};
pub use archive::{ArchiveEntry, ArchiveWriter, EntryData, CANONICAL_MTIME};
pub use config::{
    output_and_format, ArchiveFormat, Filter, FilterKind, FilterSpec, PackOptions,
};
pub use discovery::{
    CacheWarning, Discover, Discovered, DiscoveredFile, EnvLocator, MissingCachePolicy,
    PrefixScanner,
};
pub use env::Environment;
pub use error::{PackError, PackResult};
pub use file::{classify_bytes, ContentKind, File, FileSource, CLASSIFY_LIMIT};
pub use finalize::{run_from_current_exe, FinalizeReport, Finalizer, FINALIZED_MARKER};
pub use overlay::{OverlayReader, OverlayWriter, OVERLAY_MAGIC, OVERLAY_VERSION};
pub use packer::{prepare_entry, PackOutput, Packer, PreparedEntry, BATCH_SIZE};
pub use prefix::{find_placeholder, is_path_boundary, PrefixLocator};
pub use progress::{PackProgress, ProgressStyles};
pub use rewrite::{
    replace_prefix, DeferredEntry, DeferredManifest, FileMode, RewritePlan, Rewriter,
};
pub use stub::{StubGenerator, FINALIZE_ENTRY, FINALIZE_MODE};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Directory holding executables inside an environment
#[cfg(not(windows))]
pub const BIN_DIR: &str = "bin";

/// Directory holding executables inside an environment
#[cfg(windows)]
pub const BIN_DIR: &str = "Scripts";

/// Pack the environment described by `options`, returning the archive path
pub fn pack(options: PackOptions) -> PackResult<std::path::PathBuf> {
    Packer::new(options).pack().map(|output| output.archive)
}

/// Check if the current executable carries a finalize manifest
pub fn is_finalize_stub() -> bool {
    let exe_path = match std::env::current_exe() {
        Ok(p) => p,
        Err(_) => return false,
    };
    OverlayReader::has_overlay(&exe_path).unwrap_or(false)
}
