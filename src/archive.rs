//! Archive writers
//!
//! [`ArchiveWriter`] streams entries into tar, tar.gz, tar.bz2 or zip output.
//! Every entry gets the same canonical timestamp and neutral ownership, so
//! packing an unchanged environment twice yields identical bytes.

use crate::config::ArchiveFormat;
use crate::{PackError, PackResult};
use std::fs;
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Timestamp of every entry: 1980-01-01T00:00:00Z, the earliest zip time
pub const CANONICAL_MTIME: u64 = 315_532_800;

/// Maximum number of zip entries without ZIP64
pub const ZIP_MAX_ENTRIES: usize = u16::MAX as usize;

/// Maximum zip entry size or offset without ZIP64
pub const ZIP_MAX_SIZE: u64 = u32::MAX as u64;

/// Fixed size of a zip local file header, excluding the name
const ZIP_LOCAL_HEADER: u64 = 30;

/// Content of an archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryData {
    /// Stream a file from disk
    Path(PathBuf),
    /// In-memory content
    Bytes(Vec<u8>),
    /// Symbolic link to the given target
    Symlink(String),
}

/// One entry to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// `/`-separated path inside the archive
    pub name: String,
    /// Unix permission bits
    pub mode: u32,
    /// Content
    pub data: EntryData,
}

impl ArchiveEntry {
    /// Regular file streamed from `path`
    pub fn file(name: impl Into<String>, mode: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            mode,
            data: EntryData::Path(path.into()),
        }
    }

    /// Regular file with in-memory content
    pub fn bytes(name: impl Into<String>, mode: u32, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mode,
            data: EntryData::Bytes(bytes),
        }
    }

    /// Symbolic link
    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: 0o777,
            data: EntryData::Symlink(target.into()),
        }
    }

    /// Size of the content in bytes
    pub fn size(&self) -> PackResult<u64> {
        match &self.data {
            EntryData::Path(path) => Ok(fs::metadata(path)
                .map_err(|e| PackError::unreadable(path, e))?
                .len()),
            EntryData::Bytes(bytes) => Ok(bytes.len() as u64),
            EntryData::Symlink(target) => Ok(target.len() as u64),
        }
    }
}

/// Fail when `count` entries cannot fit a zip archive without ZIP64
pub fn check_zip_entry_count(count: usize, zip64: bool) -> PackResult<()> {
    if !zip64 && count > ZIP_MAX_ENTRIES {
        return Err(PackError::ArchiveLimit(format!(
            "{} entries exceed the {} allowed without ZIP64 extensions; enable zip64 to pack this environment",
            count, ZIP_MAX_ENTRIES
        )));
    }
    Ok(())
}

/// Byte stream under a tar builder
enum TarStream<W: Write> {
    Plain(W),
    Gzip(flate2::write::GzEncoder<W>),
    Bzip2(bzip2::write::BzEncoder<W>),
}

impl<W: Write> TarStream<W> {
    fn new(inner: W, format: ArchiveFormat) -> Self {
        match format {
            ArchiveFormat::TarGz => TarStream::Gzip(
                flate2::GzBuilder::new()
                    .mtime(0)
                    .write(inner, flate2::Compression::default()),
            ),
            ArchiveFormat::TarBz2 => {
                TarStream::Bzip2(bzip2::write::BzEncoder::new(inner, bzip2::Compression::default()))
            }
            _ => TarStream::Plain(inner),
        }
    }

    fn finish(self) -> io::Result<W> {
        match self {
            TarStream::Plain(w) => Ok(w),
            TarStream::Gzip(w) => w.finish(),
            TarStream::Bzip2(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for TarStream<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TarStream::Plain(w) => w.write(buf),
            TarStream::Gzip(w) => w.write(buf),
            TarStream::Bzip2(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TarStream::Plain(w) => w.flush(),
            TarStream::Gzip(w) => w.flush(),
            TarStream::Bzip2(w) => w.flush(),
        }
    }
}

enum Backend<W: Write + Seek> {
    Tar(tar::Builder<TarStream<BufWriter<W>>>),
    Zip {
        writer: ZipWriter<BufWriter<W>>,
        options: SimpleFileOptions,
    },
}

/// Streaming writer for one archive
pub struct ArchiveWriter<W: Write + Seek> {
    backend: Backend<W>,
    format: ArchiveFormat,
    zip64: bool,
    entries: usize,
    zip_offset: u64,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    /// Start an archive of `format` over `inner`.
    ///
    /// `zip64` only matters for zip output; without it the writer fails with
    /// [`PackError::ArchiveLimit`] instead of emitting ZIP64 records.
    pub fn new(inner: W, format: ArchiveFormat, zip64: bool) -> PackResult<Self> {
        let inner = BufWriter::new(inner);
        let backend = match format {
            ArchiveFormat::Zip => {
                let fixed_time = DateTime::from_date_and_time(1980, 1, 1, 0, 0, 0)
                    .map_err(|e| PackError::ArchiveLimit(e.to_string()))?;
                let options = SimpleFileOptions::default()
                    .compression_method(CompressionMethod::Deflated)
                    .last_modified_time(fixed_time);
                Backend::Zip {
                    writer: ZipWriter::new(inner),
                    options,
                }
            }
            _ => Backend::Tar(tar::Builder::new(TarStream::new(inner, format))),
        };

        Ok(Self {
            backend,
            format,
            zip64,
            entries: 0,
            zip_offset: 0,
        })
    }

    /// Output format
    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Number of entries written so far
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Append one entry
    pub fn append(&mut self, entry: &ArchiveEntry) -> PackResult<()> {
        match &mut self.backend {
            Backend::Tar(builder) => append_tar(builder, entry)?,
            Backend::Zip { writer, options } => {
                let size = entry.size()?;
                if !self.zip64 {
                    check_zip_entry_count(self.entries + 1, false)?;
                    if size >= ZIP_MAX_SIZE {
                        return Err(PackError::ArchiveLimit(format!(
                            "{} is {} bytes, too large without ZIP64 extensions",
                            entry.name, size
                        )));
                    }
                    let next = self.zip_offset + ZIP_LOCAL_HEADER + entry.name.len() as u64 + size;
                    if next >= ZIP_MAX_SIZE {
                        return Err(PackError::ArchiveLimit(format!(
                            "archive grows past 4 GiB at {}, too large without ZIP64 extensions",
                            entry.name
                        )));
                    }
                    self.zip_offset = next;
                }
                let options = options
                    .unix_permissions(entry.mode)
                    .large_file(self.zip64 && size >= ZIP_MAX_SIZE);
                append_zip(writer, entry, options)?;
            }
        }
        self.entries += 1;
        Ok(())
    }

    /// Write trailing records and return the underlying writer
    pub fn finish(self) -> PackResult<W> {
        let buffered = match self.backend {
            Backend::Tar(builder) => builder.into_inner()?.finish()?,
            Backend::Zip { writer, .. } => writer.finish()?,
        };
        let inner = buffered.into_inner().map_err(|e| e.into_error())?;
        tracing::debug!("Archive finished: {} entries ({})", self.entries, self.format);
        Ok(inner)
    }
}

fn append_tar<W: Write>(builder: &mut tar::Builder<W>, entry: &ArchiveEntry) -> PackResult<()> {
    let mut header = tar::Header::new_gnu();
    header.set_mtime(CANONICAL_MTIME);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(entry.mode);

    match &entry.data {
        EntryData::Path(path) => {
            let file = fs::File::open(path).map_err(|e| PackError::unreadable(path, e))?;
            let size = file.metadata()?.len();
            header.set_entry_type(tar::EntryType::Regular);
            append_tar_stream(builder, &mut header, &entry.name, path, file, size)?;
        }
        EntryData::Bytes(bytes) => {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(bytes.len() as u64);
            builder.append_data(&mut header, &entry.name, &bytes[..])?;
        }
        EntryData::Symlink(target) => {
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &entry.name, target)?;
        }
    }
    Ok(())
}

/// Reader counting the bytes it yields
struct Counted<R> {
    inner: R,
    count: u64,
}

impl<R: io::Read> io::Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Stream exactly `size` bytes of `reader` as one tar entry.
///
/// The header records `size` before any data is copied, so a source that
/// changed length while packing fails with `UnreadableSource`.
fn append_tar_stream<W: Write, R: io::Read>(
    builder: &mut tar::Builder<W>,
    header: &mut tar::Header,
    name: &str,
    path: &Path,
    reader: R,
    size: u64,
) -> PackResult<()> {
    header.set_size(size);
    let mut counted = Counted {
        inner: reader.take(size),
        count: 0,
    };
    builder.append_data(header, name, &mut counted)?;
    // Bytes past `size` mean the source grew
    let grew = counted.inner.into_inner().read(&mut [0u8; 1])? > 0;
    if counted.count != size || grew {
        return Err(PackError::unreadable(
            path,
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("size changed while packing: expected {} bytes", size),
            ),
        ));
    }
    Ok(())
}

fn append_zip<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    entry: &ArchiveEntry,
    options: SimpleFileOptions,
) -> PackResult<()> {
    match &entry.data {
        EntryData::Path(path) => {
            writer.start_file(entry.name.as_str(), options)?;
            let mut file = fs::File::open(path).map_err(|e| PackError::unreadable(path, e))?;
            io::copy(&mut file, writer)?;
        }
        EntryData::Bytes(bytes) => {
            writer.start_file(entry.name.as_str(), options)?;
            writer.write_all(bytes)?;
        }
        EntryData::Symlink(target) => {
            writer.add_symlink(entry.name.as_str(), target.as_str(), options)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn test_tar_entries_are_canonical() {
        let mut writer =
            ArchiveWriter::new(Cursor::new(Vec::new()), ArchiveFormat::Tar, true).unwrap();
        writer
            .append(&ArchiveEntry::bytes("bin/tool", 0o755, b"#!/bin/sh\n".to_vec()))
            .unwrap();
        writer.append(&ArchiveEntry::symlink("bin/alias", "tool")).unwrap();
        let data = writer.finish().unwrap().into_inner();

        let mut archive = tar::Archive::new(&data[..]);
        let mut entries = archive.entries().unwrap();

        let mut first = entries.next().unwrap().unwrap();
        assert_eq!(first.path().unwrap().to_str(), Some("bin/tool"));
        assert_eq!(first.header().mode().unwrap(), 0o755);
        assert_eq!(first.header().mtime().unwrap(), CANONICAL_MTIME);
        assert_eq!(first.header().uid().unwrap(), 0);
        let mut content = String::new();
        first.read_to_string(&mut content).unwrap();
        assert_eq!(content, "#!/bin/sh\n");

        let second = entries.next().unwrap().unwrap();
        assert_eq!(second.header().entry_type(), tar::EntryType::Symlink);
        assert_eq!(
            second.link_name().unwrap().unwrap().to_str(),
            Some("tool")
        );
    }

    #[test]
    fn test_tar_stream_size_must_match() {
        let path = Path::new("lib/changing.so");
        for data in [&b"short"[..], &b"much longer than declared"[..]] {
            let mut builder = tar::Builder::new(Vec::new());
            let mut header = tar::Header::new_gnu();
            let err = append_tar_stream(&mut builder, &mut header, "lib/x", path, data, 10)
                .unwrap_err();
            assert!(matches!(err, PackError::UnreadableSource { .. }));
            assert!(err.to_string().contains("lib/changing.so"));
        }

        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        append_tar_stream(&mut builder, &mut header, "lib/x", path, &b"0123456789"[..], 10)
            .unwrap();
    }

    #[test]
    fn test_zip_entry_count_limit() {
        assert!(check_zip_entry_count(ZIP_MAX_ENTRIES, false).is_ok());
        let err = check_zip_entry_count(ZIP_MAX_ENTRIES + 1, false).unwrap_err();
        assert!(err.to_string().contains("ZIP64"));
        assert!(check_zip_entry_count(ZIP_MAX_ENTRIES + 1, true).is_ok());
    }
}
