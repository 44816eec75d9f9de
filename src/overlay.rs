//! Overlay data format for finalize stubs
//!
//! The overlay is appended to the end of a runner executable and carries the
//! deferred rewrite manifest. A runner that finds an overlay on itself runs as
//! the finalize entry of an extracted archive.
//!
//! ## Format
//!
//! ```text
//! [Runner Executable]
//! [Overlay Header]
//!   - Magic: "EPAK" (4 bytes)
//!   - Version: u32 LE (4 bytes)
//!   - Manifest Length: u64 LE (8 bytes)
//! [Manifest Data] (JSON, zstd compressed)
//! [Footer]
//!   - Overlay Start Offset: u64 LE (8 bytes)
//!   - Magic: "EPAK" (4 bytes)
//! ```
//!
//! ## Content Hash
//!
//! The manifest JSON stores a BLAKE3 hash of its entries. Readers recompute it
//! and reject overlays whose entries do not match.

use crate::rewrite::{DeferredEntry, DeferredManifest};
use crate::{PackError, PackResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Magic bytes for overlay identification
pub const OVERLAY_MAGIC: &[u8; 4] = b"EPAK";

/// Current overlay format version
pub const OVERLAY_VERSION: u32 = 1;

/// Footer size in bytes (offset: 8 + magic: 4)
const FOOTER_SIZE: u64 = 12;

/// Header size in bytes (magic: 4 + version: 4 + manifest_len: 8)
const HEADER_SIZE: u64 = 16;

/// zstd level used for the manifest
const COMPRESSION_LEVEL: i32 = 3;

/// Manifest plus the hash of its entries, as stored in the overlay
#[derive(Debug, Clone, Serialize, Deserialize)]
struct OverlayMetadata {
    #[serde(flatten)]
    manifest: DeferredManifest,
    content_hash: String,
}

/// Compute the content hash of a manifest (16 hex chars, first 64 bits of BLAKE3)
pub fn content_hash(manifest: &DeferredManifest) -> String {
    let mut hasher = blake3::Hasher::new();
    for DeferredEntry {
        target,
        placeholder,
        mode,
    } in manifest.iter()
    {
        hasher.update(target.as_bytes());
        hasher.update(&[0]);
        hasher.update(placeholder.as_bytes());
        hasher.update(&[0]);
        hasher.update(&[*mode as u8]);
    }

    let hash = hasher.finalize();
    let mut short = [0u8; 8];
    short.copy_from_slice(&hash.as_bytes()[..8]);
    format!("{:016x}", u64::from_le_bytes(short))
}

/// Writer for overlays
pub struct OverlayWriter;

impl OverlayWriter {
    /// Encode `manifest` as overlay bytes starting at offset `overlay_start`
    pub fn encode(manifest: &DeferredManifest, overlay_start: u64) -> PackResult<Vec<u8>> {
        let metadata = OverlayMetadata {
            manifest: manifest.clone(),
            content_hash: content_hash(manifest),
        };
        let json = serde_json::to_vec(&metadata)?;
        let compressed = zstd::encode_all(&json[..], COMPRESSION_LEVEL)
            .map_err(|e| PackError::Compression(e.to_string()))?;

        let mut out = Vec::with_capacity(compressed.len() + (HEADER_SIZE + FOOTER_SIZE) as usize);
        out.extend_from_slice(OVERLAY_MAGIC);
        out.extend_from_slice(&OVERLAY_VERSION.to_le_bytes());
        out.extend_from_slice(&(compressed.len() as u64).to_le_bytes());
        out.extend_from_slice(&compressed);
        out.extend_from_slice(&overlay_start.to_le_bytes());
        out.extend_from_slice(OVERLAY_MAGIC);

        tracing::debug!(
            "Overlay encoded: manifest={} bytes, entries={}, hash={}",
            compressed.len(),
            manifest.len(),
            metadata.content_hash
        );

        Ok(out)
    }

    /// Append `manifest` to the end of `exe` without touching its content
    pub fn append(exe: &mut Vec<u8>, manifest: &DeferredManifest) -> PackResult<()> {
        let overlay = Self::encode(manifest, exe.len() as u64)?;
        exe.write_all(&overlay)?;
        Ok(())
    }
}

/// Reader for overlays
pub struct OverlayReader;

impl OverlayReader {
    /// Offset where the overlay starts, if `data` carries one
    pub fn overlay_start(data: &[u8]) -> Option<u64> {
        let len = data.len() as u64;
        if len < FOOTER_SIZE + HEADER_SIZE {
            return None;
        }
        let footer = &data[(len - FOOTER_SIZE) as usize..];
        if &footer[8..] != OVERLAY_MAGIC {
            return None;
        }
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&footer[..8]);
        let start = u64::from_le_bytes(offset);
        overlay_end(start).is_some_and(|end| end <= len).then_some(start)
    }

    /// Bytes of `data` before any overlay
    pub fn strip(data: &[u8]) -> &[u8] {
        match Self::overlay_start(data) {
            Some(start) => &data[..start as usize],
            None => data,
        }
    }

    /// Check if a file has overlay data
    pub fn has_overlay(path: &Path) -> PackResult<bool> {
        Ok(Self::read_footer(path)?.is_some())
    }

    /// Get the original executable size (before overlay)
    pub fn get_original_size(path: &Path) -> PackResult<Option<u64>> {
        Self::read_footer(path)
    }

    /// Read the manifest from a file, `None` if it has no overlay
    pub fn read(path: &Path) -> PackResult<Option<DeferredManifest>> {
        let Some(overlay_start) = Self::read_footer(path)? else {
            return Ok(None);
        };

        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(overlay_start))?;

        let mut header_magic = [0u8; 4];
        let mut version_bytes = [0u8; 4];
        let mut manifest_len_bytes = [0u8; 8];
        reader.read_exact(&mut header_magic)?;
        reader.read_exact(&mut version_bytes)?;
        reader.read_exact(&mut manifest_len_bytes)?;

        if &header_magic != OVERLAY_MAGIC {
            return Err(PackError::InvalidOverlay("Invalid header magic".to_string()));
        }

        let version = u32::from_le_bytes(version_bytes);
        if version != OVERLAY_VERSION {
            return Err(PackError::InvalidOverlay(format!(
                "Unsupported version: {} (expected {})",
                version, OVERLAY_VERSION
            )));
        }

        let manifest_len = u64::from_le_bytes(manifest_len_bytes);
        let available = file_len.saturating_sub(overlay_start + HEADER_SIZE + FOOTER_SIZE);
        if manifest_len > available {
            return Err(PackError::InvalidOverlay(format!(
                "Manifest length {} exceeds the {} bytes available",
                manifest_len, available
            )));
        }
        let mut compressed = vec![0u8; manifest_len as usize];
        reader.read_exact(&mut compressed)?;

        let json = zstd::decode_all(&compressed[..])
            .map_err(|e| PackError::Compression(e.to_string()))?;
        let metadata: OverlayMetadata = serde_json::from_slice(&json)?;

        let expected = content_hash(&metadata.manifest);
        if metadata.content_hash != expected {
            return Err(PackError::InvalidOverlay(format!(
                "Content hash mismatch: stored {}, computed {}",
                metadata.content_hash, expected
            )));
        }

        tracing::debug!(
            "Overlay read: {} entries, hash={}",
            metadata.manifest.len(),
            metadata.content_hash
        );

        Ok(Some(metadata.manifest))
    }

    fn read_footer(path: &Path) -> PackResult<Option<u64>> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < FOOTER_SIZE + HEADER_SIZE {
            return Ok(None);
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;

        let mut offset_bytes = [0u8; 8];
        let mut magic = [0u8; 4];
        reader.read_exact(&mut offset_bytes)?;
        reader.read_exact(&mut magic)?;

        if &magic != OVERLAY_MAGIC {
            return Ok(None);
        }

        let start = u64::from_le_bytes(offset_bytes);
        if !overlay_end(start).is_some_and(|end| end <= file_len) {
            return Err(PackError::InvalidOverlay(format!(
                "Overlay offset {} out of range for {} byte file",
                start, file_len
            )));
        }
        Ok(Some(start))
    }
}

/// End of the fixed overlay parts for an overlay starting at `start`
fn overlay_end(start: u64) -> Option<u64> {
    start.checked_add(HEADER_SIZE + FOOTER_SIZE)
}
