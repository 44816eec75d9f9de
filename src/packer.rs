//! Packing pipeline
//!
//! Files are prepared (classified, located, planned, rewritten) on a rayon
//! pool one batch at a time, then appended to the archive sequentially in
//! environment order. The archive is written to a temporary file next to the
//! output and only moved into place once everything succeeded.
//!
//! When the destination is unknown, generated `activate` / `deactivate`
//! scripts replace the environment's own, since those embed the old prefix.

use crate::activate::activation_scripts;
use crate::archive::{check_zip_entry_count, ArchiveEntry, ArchiveWriter};
use crate::config::{output_and_format, ArchiveFormat, PackOptions};
use crate::discovery::{CacheWarning, Discover, EnvLocator, PrefixScanner};
use crate::env::Environment;
use crate::file::{ContentKind, File, FileSource};
use crate::prefix::PrefixLocator;
use crate::progress::PackProgress;
use crate::rewrite::{DeferredEntry, DeferredManifest, Rewriter};
use crate::stub::{StubGenerator, FINALIZE_ENTRY, FINALIZE_MODE};
use crate::{PackError, PackResult};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;

/// Number of files prepared in parallel before being written
pub const BATCH_SIZE: usize = 256;

/// Result of a successful pack
#[derive(Debug, Clone)]
pub struct PackOutput {
    /// Archive path
    pub archive: PathBuf,
    /// Archive format
    pub format: ArchiveFormat,
    /// Number of environment files archived (excluding the finalize entry)
    pub file_count: usize,
    /// Number of files whose rewrite was deferred
    pub deferred: usize,
    /// Number of files whose content was modified before archiving
    pub rewritten: usize,
    /// Non-fatal discovery problems
    pub warnings: Vec<CacheWarning>,
}

/// A file ready to be appended
#[derive(Debug, Clone)]
pub struct PreparedEntry {
    /// Archive entry
    pub entry: ArchiveEntry,
    /// Manifest entry when the rewrite is deferred
    pub deferred: Option<DeferredEntry>,
    /// Whether the content differs from the source
    pub rewritten: bool,
}

/// Turn one file into an archive entry according to its rewrite plan
pub fn prepare_entry(rewriter: &Rewriter, file: &File) -> PackResult<PreparedEntry> {
    if file.is_symlink() {
        if let Some(path) = file.source_path() {
            let link = std::fs::read_link(path).map_err(|e| PackError::unreadable(path, e))?;
            let link = link.to_string_lossy();
            let relocated = rewriter.relocate_link(file.target(), &link);
            if let Some(relative) = &relocated {
                tracing::debug!("{}: symlink {} -> {}", file.target(), link, relative);
            }
            return Ok(PreparedEntry {
                rewritten: relocated.is_some(),
                entry: ArchiveEntry::symlink(
                    file.target(),
                    relocated.unwrap_or_else(|| link.into_owned()),
                ),
                deferred: None,
            });
        }
    }

    let mode = file.mode()?;
    let unchanged = || match file.source() {
        FileSource::Disk(path) => ArchiveEntry::file(file.target(), mode, path),
        FileSource::Inline { bytes, .. } => ArchiveEntry::bytes(file.target(), mode, bytes.clone()),
    };

    // Unscanned files only matter when they start with an interpreter line
    if file.content_kind()? == ContentKind::Unknown && file.read_head(2)? != b"#!" {
        return Ok(PreparedEntry {
            entry: unchanged(),
            deferred: None,
            rewritten: false,
        });
    }

    let data = file.read()?;
    let plan = rewriter.plan(file, &data)?;
    tracing::debug!("{}: {:?}", file.target(), plan);

    let deferred = plan.deferred_entry(file.target());
    if !plan.modifies_content() {
        return Ok(PreparedEntry {
            entry: unchanged(),
            deferred,
            rewritten: false,
        });
    }

    let content = rewriter.apply(file, &plan, &data)?;
    Ok(PreparedEntry {
        rewritten: content != data,
        entry: ArchiveEntry::bytes(file.target(), mode, content),
        deferred,
    })
}

/// Worker threads for `jobs`, never more than the available cores
pub fn worker_count(jobs: Option<usize>) -> usize {
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
    match jobs {
        Some(jobs) if jobs > 0 => jobs.min(cores),
        _ => cores,
    }
}

/// Packs environments according to [`PackOptions`]
#[derive(Debug, Clone)]
pub struct Packer {
    options: PackOptions,
}

impl Packer {
    /// Create a packer
    pub fn new(options: PackOptions) -> Self {
        Self { options }
    }

    /// Options in use
    pub fn options(&self) -> &PackOptions {
        &self.options
    }

    /// Discover the configured environment and pack it
    pub fn pack(&self) -> PackResult<PackOutput> {
        self.options.validate()?;

        let prefix = match (&self.options.prefix, &self.options.name) {
            (Some(prefix), _) => prefix.clone(),
            (None, Some(name)) => EnvLocator::new(self.options.envs_dirs.clone()).locate(name)?,
            (None, None) => {
                return Err(PackError::Config(
                    "Either an environment name or a prefix is required".to_string(),
                ))
            }
        };

        // Fail on an existing output before scanning the environment
        if let Some(name) = prefix.file_name() {
            let (output, _) = self.resolve_output(&name.to_string_lossy())?;
            self.check_output(&output)?;
        }

        let discovered = PrefixScanner::new(&prefix)
            .with_missing_cache(self.options.missing_cache)
            .discover()?;
        let warnings = discovered.warnings.clone();
        let env = Environment::from_discovered(discovered)?;

        let mut output = self.pack_environment(&env)?;
        output.warnings = warnings;
        Ok(output)
    }

    /// Pack an already discovered environment
    pub fn pack_environment(&self, env: &Environment) -> PackResult<PackOutput> {
        self.options.validate()?;
        let filters = self.options.parsed_filters()?;
        let (output, format) = self.resolve_output(env.name())?;
        self.check_output(&output)?;

        let mut env = env
            .apply_filters(&filters)?
            .with_placeholders(self.options.extra_placeholders.iter().cloned());
        if self.options.dest_prefix.is_none() {
            env = env.with_generated(activation_scripts())?;
        }
        if format == ArchiveFormat::Zip {
            check_zip_entry_count(env.len(), self.options.zip64)?;
        }

        self.write(&env, &output, format)
    }

    fn resolve_output(&self, name: &str) -> PackResult<(PathBuf, ArchiveFormat)> {
        output_and_format(
            name,
            self.options.output.as_deref(),
            self.options.format.as_deref(),
        )
    }

    fn check_output(&self, output: &Path) -> PackResult<()> {
        if output.exists() && !self.options.force {
            return Err(PackError::OutputExists(output.to_path_buf()));
        }
        Ok(())
    }

    fn write(&self, env: &Environment, output: &Path, format: ArchiveFormat) -> PackResult<PackOutput> {
        let start = Instant::now();
        tracing::info!(
            "Packing {} ({} files) into {} [{}]",
            env.name(),
            env.len(),
            output.display(),
            format
        );

        let locator = PrefixLocator::new(env.placeholders());
        let rewriter = Rewriter::new(locator, self.options.dest_prefix.clone());
        match rewriter.destination() {
            Some(dest) => tracing::info!("Rewriting prefixes to {}", dest),
            None => tracing::info!("Destination unknown, rewrites are deferred to extraction"),
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_count(self.options.jobs))
            .build()
            .map_err(|e| PackError::Config(format!("Cannot start worker pool: {}", e)))?;

        let dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(dir)?;
        let mut writer = ArchiveWriter::new(temp, format, self.options.zip64)?;

        let progress = PackProgress::files(env.len() as u64, self.options.show_progress);
        let mut manifest = DeferredManifest::new();
        let mut rewritten = 0;

        for batch in env.files().chunks(BATCH_SIZE) {
            let prepared: Vec<PackResult<PreparedEntry>> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|file| prepare_entry(&rewriter, file))
                    .collect()
            });

            for result in prepared {
                let prepared = match result {
                    Ok(prepared) => prepared,
                    Err(e) => {
                        progress.abandon();
                        return Err(e);
                    }
                };
                if let Some(entry) = prepared.deferred {
                    manifest.push(entry);
                }
                if prepared.rewritten {
                    rewritten += 1;
                }
                writer.append(&prepared.entry)?;
                progress.file_done(&prepared.entry.name);
            }
        }

        if !manifest.is_empty() {
            if env.get(FINALIZE_ENTRY).is_some() {
                progress.abandon();
                return Err(PackError::Config(format!(
                    "Environment already contains {}, which is reserved for the finalize stub",
                    FINALIZE_ENTRY
                )));
            }
            let generator = match &self.options.stub_runner {
                Some(runner) => StubGenerator::new(runner),
                None => StubGenerator::current_exe()?,
            };
            let stub = generator.generate(&manifest)?;
            writer.append(&ArchiveEntry::bytes(FINALIZE_ENTRY, FINALIZE_MODE, stub))?;
        }

        let temp = writer.finish()?;
        temp.as_file().sync_all()?;
        self.persist(temp, output)?;

        progress.finish(&format!("Packed {} files", env.len()));
        tracing::info!(
            "Packed {} files ({} rewritten, {} deferred) into {} in {:.2?}",
            env.len(),
            rewritten,
            manifest.len(),
            output.display(),
            start.elapsed()
        );

        Ok(PackOutput {
            archive: output.to_path_buf(),
            format,
            file_count: env.len(),
            deferred: manifest.len(),
            rewritten,
            warnings: Vec::new(),
        })
    }

    fn persist(&self, temp: NamedTempFile, output: &Path) -> PackResult<()> {
        let result = if self.options.force {
            temp.persist(output)
        } else {
            temp.persist_noclobber(output)
        };
        result.map(|_| ()).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                PackError::OutputExists(output.to_path_buf())
            } else {
                PackError::Io(e.error)
            }
        })
    }
}
