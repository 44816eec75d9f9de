//! Prefix rewriting
//!
//! The decision of what to do with a file is a [`RewritePlan`] value computed
//! by [`Rewriter::plan`]; [`Rewriter::apply`] executes it. Keeping the two apart
//! lets the packer run planning across a worker pool while the finalize stub
//! reuses [`replace_prefix`] for the deferred half of the work.

use crate::file::{classify_bytes, ContentKind, File};
use crate::prefix::{find_placeholder, PrefixLocator};
use crate::{PackError, PackResult};
use memchr::memmem;
use serde::{Deserialize, Serialize};

/// How a deferred rewrite must treat the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    /// Free-length replacement
    Text,
    /// Length-preserving replacement
    Binary,
}

impl FileMode {
    /// Rewrite mode for a content kind; unknown content is never rewritten
    pub fn from_kind(kind: ContentKind) -> Option<Self> {
        match kind {
            ContentKind::Text => Some(FileMode::Text),
            ContentKind::Binary => Some(FileMode::Binary),
            ContentKind::Unknown => None,
        }
    }
}

/// A file whose rewrite is postponed until extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredEntry {
    /// Path inside the archive
    pub target: String,
    /// Placeholder embedded in the archived bytes
    pub placeholder: String,
    /// Rewrite mode
    pub mode: FileMode,
}

/// Ordered list of deferred rewrites, embedded in the finalize stub
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredManifest {
    /// Entries in archive order
    pub entries: Vec<DeferredEntry>,
}

impl DeferredManifest {
    /// Create an empty manifest
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn push(&mut self, entry: DeferredEntry) {
        self.entries.push(entry);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there is nothing to rewrite
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries
    pub fn iter(&self) -> std::slice::Iter<'_, DeferredEntry> {
        self.entries.iter()
    }
}

/// What to do with one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewritePlan {
    /// Nothing to rewrite
    NoOp,
    /// Rewrite now, the destination is known
    Now {
        /// Placeholder found in the file
        placeholder: String,
        /// Destination prefix
        destination: String,
        /// Rewrite mode
        mode: FileMode,
        /// Replacement interpreter line when the shebang uses another prefix
        shebang: Option<String>,
    },
    /// Archive as-is (apart from the shebang) and rewrite after extraction
    Defer {
        /// Placeholder found in the file
        placeholder: String,
        /// Rewrite mode
        mode: FileMode,
        /// Replacement interpreter line
        shebang: Option<String>,
    },
    /// Only the interpreter line needs rewriting
    Shebang {
        /// Replacement interpreter line, without the newline
        line: String,
    },
}

impl RewritePlan {
    /// Check if the plan leaves the content untouched
    pub fn is_noop(&self) -> bool {
        matches!(self, RewritePlan::NoOp)
    }

    /// Check if content is modified before archiving
    pub fn modifies_content(&self) -> bool {
        match self {
            RewritePlan::NoOp => false,
            RewritePlan::Defer { shebang, .. } => shebang.is_some(),
            RewritePlan::Now { .. } | RewritePlan::Shebang { .. } => true,
        }
    }

    /// Manifest entry for a deferred plan
    pub fn deferred_entry(&self, target: &str) -> Option<DeferredEntry> {
        match self {
            RewritePlan::Defer {
                placeholder, mode, ..
            } => Some(DeferredEntry {
                target: target.to_string(),
                placeholder: placeholder.clone(),
                mode: *mode,
            }),
            _ => None,
        }
    }
}

/// Replace every occurrence of `placeholder` with `destination`
pub fn rewrite_text(data: &[u8], placeholder: &str, destination: &str) -> Vec<u8> {
    let needle = placeholder.as_bytes();
    let mut out = Vec::with_capacity(data.len());
    let mut last = 0;
    for start in memmem::find_iter(data, needle) {
        out.extend_from_slice(&data[last..start]);
        out.extend_from_slice(destination.as_bytes());
        last = start + needle.len();
    }
    out.extend_from_slice(&data[last..]);
    out
}

/// Length-preserving replacement inside NUL-terminated strings.
///
/// Only genuine occurrences (those passing the binary boundary rule) are
/// replaced; the rest of each affected string is copied as-is and the string
/// is padded with NUL bytes back to its original length. Returns `None` when
/// `destination` is longer than `placeholder`.
pub fn rewrite_binary(data: &[u8], placeholder: &str, destination: &str) -> Option<Vec<u8>> {
    if destination.len() > placeholder.len() {
        return None;
    }

    let hits = find_placeholder(data, placeholder, ContentKind::Binary);
    let mut out = data.to_vec();
    let mut next = 0;
    while next < hits.len() {
        let start = hits[next];
        let end = memchr::memchr(0, &data[start..])
            .map(|i| start + i)
            .unwrap_or(data.len());

        let mut replaced = Vec::with_capacity(end - start);
        let mut last = start;
        while next < hits.len() && hits[next] < end {
            replaced.extend_from_slice(&data[last..hits[next]]);
            replaced.extend_from_slice(destination.as_bytes());
            last = hits[next] + placeholder.len();
            next += 1;
        }
        replaced.extend_from_slice(&data[last..end]);

        out[start..start + replaced.len()].copy_from_slice(&replaced);
        out[start + replaced.len()..end].fill(0);
    }
    Some(out)
}

/// Rewrite `placeholder` to `destination` according to `mode`.
///
/// `target` is only used for error context.
pub fn replace_prefix(
    target: &str,
    mode: FileMode,
    data: &[u8],
    placeholder: &str,
    destination: &str,
) -> PackResult<Vec<u8>> {
    match mode {
        FileMode::Text => Ok(rewrite_text(data, placeholder, destination)),
        FileMode::Binary => rewrite_binary(data, placeholder, destination).ok_or_else(|| {
            PackError::PlaceholderTooLong {
                path: target.to_string(),
                placeholder: placeholder.to_string(),
                destination: destination.to_string(),
            }
        }),
    }
}

/// Parsed `#!` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shebang<'a> {
    /// Interpreter path
    pub interpreter: &'a str,
    /// Arguments after the interpreter, trimmed
    pub args: &'a str,
    /// Byte offset of the end of the line (the newline, or end of data)
    pub line_end: usize,
}

/// Parse the interpreter directive at the start of `data`
pub fn parse_shebang(data: &[u8]) -> Option<Shebang<'_>> {
    let rest = data.strip_prefix(b"#!")?;
    let line_end = memchr::memchr(b'\n', data).unwrap_or(data.len());
    let line = std::str::from_utf8(&rest[..line_end - 2]).ok()?;
    let line = line.trim_end_matches('\r').trim_start();
    let (interpreter, args) = match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim()),
        None => (line, ""),
    };
    if interpreter.is_empty() {
        return None;
    }
    Some(Shebang {
        interpreter,
        args,
        line_end,
    })
}

/// Replace the first line of `data` with `line`
pub fn apply_shebang(data: &[u8], line: &str) -> Vec<u8> {
    let line_end = memchr::memchr(b'\n', data).unwrap_or(data.len());
    let mut out = Vec::with_capacity(data.len() + line.len());
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(&data[line_end..]);
    out
}

/// Relative path from directory `from_dir` to `to`, both archive paths
pub fn relative_path(from_dir: &str, to: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|p| !p.is_empty()).collect();
    let to: Vec<&str> = to.split('/').filter(|p| !p.is_empty()).collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend_from_slice(&to[common..]);
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Plans and applies placeholder rewrites for one packing run
#[derive(Debug, Clone)]
pub struct Rewriter {
    locator: PrefixLocator,
    destination: Option<String>,
}

impl Rewriter {
    /// Create a rewriter; `destination` is `None` when the extraction path is
    /// not known at packing time.
    pub fn new(locator: PrefixLocator, destination: Option<String>) -> Self {
        let destination = destination.map(|d| {
            let trimmed = d.trim_end_matches(['/', '\\']);
            if trimmed.is_empty() {
                d
            } else {
                trimmed.to_string()
            }
        });
        Self {
            locator,
            destination,
        }
    }

    /// Placeholder locator
    pub fn locator(&self) -> &PrefixLocator {
        &self.locator
    }

    /// Destination prefix, if known
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Read `file` and plan its rewrite
    pub fn plan_file(&self, file: &File) -> PackResult<RewritePlan> {
        let data = file.read()?;
        self.plan(file, &data)
    }

    /// Plan the rewrite of `file`, whose current content is `data`.
    ///
    /// Fails with [`PackError::EncodingMismatch`] when `data` no longer
    /// classifies the way the file was classified earlier.
    pub fn plan(&self, file: &File, data: &[u8]) -> PackResult<RewritePlan> {
        let kind = file.content_kind()?;
        if kind.is_scannable() {
            let found = classify_bytes(file.is_managed(), data);
            if found != kind {
                return Err(PackError::EncodingMismatch {
                    path: file.target().to_string(),
                    expected: kind.to_string(),
                    found: found.to_string(),
                });
            }
        }

        let shebang = if kind == ContentKind::Binary {
            None
        } else {
            self.fix_shebang(data)
        };

        let Some(mode) = FileMode::from_kind(kind) else {
            return Ok(shebang.map_or(RewritePlan::NoOp, |(line, _)| RewritePlan::Shebang { line }));
        };

        let Some(placeholder) = file.locate_in(&self.locator, kind, data) else {
            return Ok(shebang.map_or(RewritePlan::NoOp, |(line, _)| RewritePlan::Shebang { line }));
        };
        let placeholder = placeholder.to_string();

        match &self.destination {
            Some(destination) => {
                if mode == FileMode::Binary && destination.len() > placeholder.len() {
                    return Err(PackError::PlaceholderTooLong {
                        path: file.target().to_string(),
                        placeholder,
                        destination: destination.clone(),
                    });
                }
                // A shebang under the same placeholder is covered by the full rewrite
                let shebang = shebang
                    .filter(|(_, owner)| *owner != placeholder)
                    .map(|(line, _)| line);
                Ok(RewritePlan::Now {
                    placeholder,
                    destination: destination.clone(),
                    mode,
                    shebang,
                })
            }
            None => match shebang {
                Some((line, _)) => {
                    let fixed = apply_shebang(data, &line);
                    if find_placeholder(&fixed, &placeholder, kind).is_empty() {
                        Ok(RewritePlan::Shebang { line })
                    } else {
                        Ok(RewritePlan::Defer {
                            placeholder,
                            mode,
                            shebang: Some(line),
                        })
                    }
                }
                None => Ok(RewritePlan::Defer {
                    placeholder,
                    mode,
                    shebang: None,
                }),
            },
        }
    }

    /// Execute `plan` against `data`
    pub fn apply(&self, file: &File, plan: &RewritePlan, data: &[u8]) -> PackResult<Vec<u8>> {
        match plan {
            RewritePlan::NoOp => Ok(data.to_vec()),
            RewritePlan::Shebang { line } => Ok(apply_shebang(data, line)),
            RewritePlan::Defer { shebang, .. } => Ok(match shebang {
                Some(line) => apply_shebang(data, line),
                None => data.to_vec(),
            }),
            RewritePlan::Now {
                placeholder,
                destination,
                mode,
                shebang,
            } => {
                let fixed;
                let data = match shebang {
                    Some(line) => {
                        fixed = apply_shebang(data, line);
                        &fixed[..]
                    }
                    None => data,
                };
                replace_prefix(file.target(), *mode, data, placeholder, destination)
            }
        }
    }

    /// Relative replacement for an absolute symlink target inside the
    /// environment; `None` when the link needs no change.
    pub fn relocate_link(&self, entry_target: &str, link: &str) -> Option<String> {
        let link = link.replace('\\', "/");
        let owner = self.locator.owning_prefix(&link)?;
        let inside = link[owner.len()..].trim_start_matches('/');
        let parent = entry_target.rsplit_once('/').map_or("", |(dir, _)| dir);
        Some(relative_path(parent, inside))
    }

    /// New interpreter line and the prefix it replaced, when the shebang
    /// points inside the environment
    fn fix_shebang(&self, data: &[u8]) -> Option<(String, String)> {
        let shebang = parse_shebang(data)?;
        let owner = self.locator.owning_prefix(shebang.interpreter)?;
        let line = match &self.destination {
            Some(destination) => {
                let mut line = format!("#!{}{}", destination, &shebang.interpreter[owner.len()..]);
                if !shebang.args.is_empty() {
                    line.push(' ');
                    line.push_str(shebang.args);
                }
                line
            }
            None => {
                // env cannot portably pass interpreter arguments
                if !shebang.args.is_empty() {
                    return None;
                }
                let name = shebang.interpreter.rsplit('/').next()?;
                format!("#!/usr/bin/env {}", name)
            }
        };
        Some((line, owner.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_binary_pads_with_nul() {
        let data = b"abc\x00/opt/placeholder/lib:/opt/placeholder/bin\x00tail";
        let out = rewrite_binary(data, "/opt/placeholder", "/srv/x").unwrap();
        assert_eq!(out.len(), data.len());
        assert!(out.starts_with(b"abc\x00/srv/x/lib:/srv/x/bin\x00"));
        assert!(out.ends_with(b"\x00tail"));
    }

    #[test]
    fn test_rewrite_binary_too_long() {
        assert!(rewrite_binary(b"/a\x00", "/a", "/longer").is_none());
    }

    #[test]
    fn test_parse_shebang() {
        let sb = parse_shebang(b"#!/opt/env/bin/python3 -E\nprint(1)\n").unwrap();
        assert_eq!(sb.interpreter, "/opt/env/bin/python3");
        assert_eq!(sb.args, "-E");
        assert_eq!(sb.line_end, 25);
        assert!(parse_shebang(b"print(1)").is_none());
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(relative_path("lib", "lib/libfoo.so.1"), "libfoo.so.1");
        assert_eq!(relative_path("bin", "lib/python"), "../lib/python");
        assert_eq!(relative_path("", "bin/python"), "bin/python");
        assert_eq!(relative_path("lib", "lib"), ".");
    }
}
