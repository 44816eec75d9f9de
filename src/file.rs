//! File entries and content classification
//!
//! A [`File`] is one entry destined for the archive. Its [`ContentKind`] is
//! computed lazily from a bounded sample of its bytes and cached, together with
//! the placeholder found in its content, for the lifetime of the entry.

use crate::prefix::PrefixLocator;
use crate::{PackError, PackResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Maximum number of bytes inspected when classifying a file
pub const CLASSIFY_LIMIT: usize = 8 * 1024;

/// Encoding class of a file's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Decodes as UTF-8 and is tracked by the installer
    Text,
    /// Does not decode as text
    Binary,
    /// Not tracked by the installer (or not a regular file); never scanned
    Unknown,
}

impl ContentKind {
    /// Get the kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Binary => "binary",
            ContentKind::Unknown => "unknown",
        }
    }

    /// Whether files of this kind are scanned for placeholders
    pub fn is_scannable(&self) -> bool {
        !matches!(self, ContentKind::Unknown)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a sample of file content.
///
/// Unmanaged files are always [`ContentKind::Unknown`]. Managed files are
/// [`ContentKind::Text`] when the sample decodes as UTF-8 without NUL bytes;
/// a multi-byte sequence cut off by the end of the sample still counts as text.
pub fn classify_bytes(is_managed: bool, sample: &[u8]) -> ContentKind {
    if !is_managed {
        return ContentKind::Unknown;
    }

    let sample = &sample[..sample.len().min(CLASSIFY_LIMIT)];
    if memchr::memchr(0, sample).is_some() {
        return ContentKind::Binary;
    }

    match std::str::from_utf8(sample) {
        Ok(_) => ContentKind::Text,
        // Truncated at the end of the sample, not invalid
        Err(e) if e.error_len().is_none() => ContentKind::Text,
        Err(_) => ContentKind::Binary,
    }
}

/// Where the bytes of a file come from
#[derive(Debug, Clone)]
pub enum FileSource {
    /// A file (or symlink) on disk
    Disk(PathBuf),
    /// Generated content with no backing file
    Inline {
        /// File content
        bytes: Vec<u8>,
        /// Unix permission bits
        mode: u32,
    },
}

/// One entry destined for the archive
pub struct File {
    source: FileSource,
    target: String,
    is_managed: bool,
    pub(crate) order: usize,
    kind: OnceLock<ContentKind>,
    placeholder: OnceLock<Option<String>>,
}

impl File {
    /// Create an entry backed by a file on disk.
    ///
    /// The target path is normalized to forward slashes.
    pub fn new(source: impl Into<PathBuf>, target: impl AsRef<str>) -> Self {
        Self::with_source(FileSource::Disk(source.into()), target)
    }

    /// Create a synthetic entry with inline content
    pub fn inline(target: impl AsRef<str>, bytes: Vec<u8>, mode: u32) -> Self {
        Self::with_source(FileSource::Inline { bytes, mode }, target)
    }

    fn with_source(source: FileSource, target: impl AsRef<str>) -> Self {
        Self {
            source,
            target: normalize_target(target.as_ref()),
            is_managed: false,
            order: 0,
            kind: OnceLock::new(),
            placeholder: OnceLock::new(),
        }
    }

    /// Mark whether the installer's records know this file
    pub fn managed(mut self, is_managed: bool) -> Self {
        self.is_managed = is_managed;
        self
    }

    /// Relative path inside the archive
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Where the content comes from
    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// Source path on disk, if any
    pub fn source_path(&self) -> Option<&Path> {
        match &self.source {
            FileSource::Disk(path) => Some(path),
            FileSource::Inline { .. } => None,
        }
    }

    /// Whether the installer's records know this file
    pub fn is_managed(&self) -> bool {
        self.is_managed
    }

    /// Whether the source is a symbolic link
    pub fn is_symlink(&self) -> bool {
        self.source_path()
            .and_then(|p| fs::symlink_metadata(p).ok())
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    /// Classify the file, reading at most [`CLASSIFY_LIMIT`] bytes once.
    pub fn content_kind(&self) -> PackResult<ContentKind> {
        if let Some(kind) = self.kind.get() {
            return Ok(*kind);
        }

        let kind = if !self.is_managed || self.is_symlink() {
            ContentKind::Unknown
        } else {
            classify_bytes(self.is_managed, &self.read_head(CLASSIFY_LIMIT)?)
        };

        Ok(*self.kind.get_or_init(|| kind))
    }

    /// Cached classification, if already computed
    pub fn cached_kind(&self) -> Option<ContentKind> {
        self.kind.get().copied()
    }

    /// Locate the placeholder embedded in this file, reading it if needed.
    ///
    /// The result is cached: later calls return the same value even with a
    /// different locator.
    pub fn locate(&self, locator: &PrefixLocator) -> PackResult<Option<&str>> {
        if let Some(found) = self.placeholder.get() {
            return Ok(found.as_deref());
        }

        let kind = self.content_kind()?;
        let found = if kind.is_scannable() {
            let data = self.read()?;
            locator.locate(&data, kind).map(str::to_string)
        } else {
            None
        };

        Ok(self.placeholder.get_or_init(|| found).as_deref())
    }

    /// Locate using bytes already in memory
    pub(crate) fn locate_in(
        &self,
        locator: &PrefixLocator,
        kind: ContentKind,
        data: &[u8],
    ) -> Option<&str> {
        self.placeholder
            .get_or_init(|| locator.locate(data, kind).map(str::to_string))
            .as_deref()
    }

    /// Cached placeholder, if located already
    pub fn placeholder(&self) -> Option<&str> {
        self.placeholder.get().and_then(|p| p.as_deref())
    }

    /// Read the full content
    pub fn read(&self) -> PackResult<Vec<u8>> {
        match &self.source {
            FileSource::Disk(path) => fs::read(path).map_err(|e| PackError::unreadable(path, e)),
            FileSource::Inline { bytes, .. } => Ok(bytes.clone()),
        }
    }

    /// Read up to `limit` bytes from the start of the content
    pub fn read_head(&self, limit: usize) -> PackResult<Vec<u8>> {
        match &self.source {
            FileSource::Disk(path) => {
                let file = fs::File::open(path).map_err(|e| PackError::unreadable(path, e))?;
                let mut head = Vec::with_capacity(limit);
                file.take(limit as u64)
                    .read_to_end(&mut head)
                    .map_err(|e| PackError::unreadable(path, e))?;
                Ok(head)
            }
            FileSource::Inline { bytes, .. } => Ok(bytes[..bytes.len().min(limit)].to_vec()),
        }
    }

    /// Unix permission bits of the source
    pub fn mode(&self) -> PackResult<u32> {
        match &self.source {
            FileSource::Inline { mode, .. } => Ok(*mode),
            FileSource::Disk(path) => {
                let meta = fs::symlink_metadata(path).map_err(|e| PackError::unreadable(path, e))?;
                Ok(permission_bits(&meta, &self.target))
            }
        }
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("source", &self.source_path())
            .field("target", &self.target)
            .field("is_managed", &self.is_managed)
            .field("content_kind", &self.kind.get())
            .field("placeholder", &self.placeholder())
            .finish()
    }
}

/// Normalize an archive path: forward slashes, no leading `./` or `/`
pub fn normalize_target(target: &str) -> String {
    let unified = target.replace('\\', "/");
    unified
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata, _target: &str) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(meta: &fs::Metadata, target: &str) -> u32 {
    let exec = target.starts_with(&format!("{}/", crate::BIN_DIR))
        || target.ends_with(".exe")
        || target.ends_with(".bat");
    let mut mode = if exec || meta.is_dir() { 0o755 } else { 0o644 };
    if meta.permissions().readonly() {
        mode &= !0o222;
    }
    mode
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmanaged_is_unknown() {
        assert_eq!(classify_bytes(false, b"plain text"), ContentKind::Unknown);
    }

    #[test]
    fn test_truncated_utf8_is_text() {
        // "é" is two bytes; keep only the first
        let sample = b"caf\xc3";
        assert_eq!(classify_bytes(true, sample), ContentKind::Text);
    }

    #[test]
    fn test_invalid_utf8_is_binary() {
        assert_eq!(classify_bytes(true, b"\xff\xfeabc"), ContentKind::Binary);
        assert_eq!(classify_bytes(true, b"\x7fELF\x00\x01"), ContentKind::Binary);
    }

    #[test]
    fn test_normalize_target() {
        assert_eq!(normalize_target("./bin\\python"), "bin/python");
        assert_eq!(normalize_target("/lib//libfoo.so"), "lib/libfoo.so");
    }
}
