//! Locating embedded installation prefixes
//!
//! Text content matches any exact occurrence of a candidate prefix. Binary
//! content additionally requires the byte after the match to be a path
//! boundary, so that `/opt/env` is not detected inside `/opt/env2/lib`.
//!
//! ## Boundary rule
//!
//! A binary match is genuine when it is followed by the end of the data, a NUL
//! byte, a path separator (`/` or `\`), a path-list separator (`:` or `;`), a
//! quote (`"` or `'`), or ASCII whitespace.

use crate::file::ContentKind;
use memchr::memmem;

/// Whether `next` (the byte after a match, `None` at end of data) ends a path
pub fn is_path_boundary(next: Option<u8>) -> bool {
    match next {
        None => true,
        Some(b) => matches!(b, 0 | b'/' | b'\\' | b':' | b';' | b'"' | b'\'') || b.is_ascii_whitespace(),
    }
}

/// Offsets of every genuine occurrence of `placeholder` in `data`
pub fn find_placeholder(data: &[u8], placeholder: &str, kind: ContentKind) -> Vec<usize> {
    let needle = placeholder.as_bytes();
    if needle.is_empty() || !kind.is_scannable() {
        return Vec::new();
    }

    memmem::find_iter(data, needle)
        .filter(|&start| match kind {
            ContentKind::Binary => is_path_boundary(data.get(start + needle.len()).copied()),
            _ => true,
        })
        .collect()
}

/// Searches file content for any of a set of candidate prefixes
#[derive(Debug, Clone, Default)]
pub struct PrefixLocator {
    /// Candidates, longest first
    candidates: Vec<String>,
}

impl PrefixLocator {
    /// Create a locator from candidate prefixes.
    ///
    /// Empty and duplicate candidates are dropped; longer candidates are tried
    /// first so that a placeholder wins over any of its own prefixes.
    pub fn new(candidates: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut candidates: Vec<String> = candidates
            .into_iter()
            .map(Into::into)
            .map(|c| c.trim_end_matches(['/', '\\']).to_string())
            .filter(|c| !c.is_empty())
            .collect();
        candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        candidates.dedup();
        Self { candidates }
    }

    /// Candidate prefixes, longest first
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// First candidate (in longest-first order) found in `data`
    pub fn locate(&self, data: &[u8], kind: ContentKind) -> Option<&str> {
        self.candidates
            .iter()
            .find(|c| !find_placeholder(data, c, kind).is_empty())
            .map(String::as_str)
    }

    /// Every candidate found in `data`
    pub fn locate_all(&self, data: &[u8], kind: ContentKind) -> Vec<&str> {
        self.candidates
            .iter()
            .filter(|c| !find_placeholder(data, c, kind).is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Candidate that `path` lives under, if any
    pub fn owning_prefix(&self, path: &str) -> Option<&str> {
        self.candidates
            .iter()
            .find(|c| {
                path.strip_prefix(c.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_requires_boundary() {
        let data = b"\x00/opt/env2/lib\x00/opt/env/lib\x00";
        let hits = find_placeholder(data, "/opt/env", ContentKind::Binary);
        assert_eq!(hits, vec![15]);
    }

    #[test]
    fn test_text_matches_any_occurrence() {
        let data = b"/opt/env2 /opt/env";
        let hits = find_placeholder(data, "/opt/env", ContentKind::Text);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_unknown_never_matches() {
        assert!(find_placeholder(b"/opt/env", "/opt/env", ContentKind::Unknown).is_empty());
    }

    #[test]
    fn test_longest_candidate_wins() {
        let locator = PrefixLocator::new(["/opt", "/opt/env/"]);
        assert_eq!(locator.candidates(), &["/opt/env".to_string(), "/opt".to_string()]);
        assert_eq!(
            locator.locate(b"x=/opt/env/bin", ContentKind::Text),
            Some("/opt/env")
        );
    }

    #[test]
    fn test_owning_prefix() {
        let locator = PrefixLocator::new(["/opt/env"]);
        assert_eq!(locator.owning_prefix("/opt/env/bin/python"), Some("/opt/env"));
        assert_eq!(locator.owning_prefix("/opt/envx/bin/python"), None);
    }
}
