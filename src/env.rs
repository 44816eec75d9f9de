//! Environment model
//!
//! An [`Environment`] is an ordered, immutable collection of [`File`] entries
//! plus the prefix the environment was installed at. Filtering never mutates:
//! [`Environment::include`] and [`Environment::exclude`] return new values that
//! share the underlying files, so cached classifications survive filtering.

use crate::config::{Filter, FilterKind};
use crate::discovery::Discovered;
use crate::file::{normalize_target, File};
use crate::{PackError, PackResult};
use glob::Pattern;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// An installed environment ready for packing
#[derive(Clone)]
pub struct Environment {
    name: String,
    prefix: String,
    files: Vec<Arc<File>>,
    excluded: Vec<Arc<File>>,
    placeholders: Vec<String>,
}

impl Environment {
    /// Create an environment from files in discovery order.
    ///
    /// Fails if two files share a target path.
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        files: Vec<File>,
    ) -> PackResult<Self> {
        let mut seen = HashSet::with_capacity(files.len());
        let mut entries = Vec::with_capacity(files.len());
        for (order, mut file) in files.into_iter().enumerate() {
            if !seen.insert(file.target().to_string()) {
                return Err(PackError::Config(format!(
                    "Duplicate archive path: {}",
                    file.target()
                )));
            }
            file.order = order;
            entries.push(Arc::new(file));
        }

        Ok(Self {
            name: name.into(),
            prefix: prefix.into(),
            files: entries,
            excluded: Vec::new(),
            placeholders: Vec::new(),
        })
    }

    /// Build from a discovery result
    pub fn from_discovered(discovered: Discovered) -> PackResult<Self> {
        let files = discovered
            .files
            .into_iter()
            .map(|f| File::new(f.source, &f.target).managed(f.is_managed))
            .collect();
        Ok(Self::new(discovered.name, discovered.prefix, files)?
            .with_placeholders(discovered.placeholders))
    }

    /// Add placeholders, besides the prefix, that files may embed
    pub fn with_placeholders(mut self, placeholders: impl IntoIterator<Item = String>) -> Self {
        for placeholder in placeholders {
            if placeholder != self.prefix && !self.placeholders.contains(&placeholder) {
                self.placeholders.push(placeholder);
            }
        }
        self
    }

    /// Copy with `generated` files appended after the existing ones.
    ///
    /// A generated file replaces any file, included or excluded, at the same
    /// archive path.
    pub fn with_generated(&self, generated: Vec<File>) -> PackResult<Self> {
        let mut order = self
            .files
            .iter()
            .chain(&self.excluded)
            .map(|f| f.order + 1)
            .max()
            .unwrap_or(0);
        let mut targets = HashSet::with_capacity(generated.len());
        let mut added = Vec::with_capacity(generated.len());
        for mut file in generated {
            if !targets.insert(file.target().to_string()) {
                return Err(PackError::Config(format!(
                    "Duplicate archive path: {}",
                    file.target()
                )));
            }
            file.order = order;
            order += 1;
            added.push(Arc::new(file));
        }

        let kept = |f: &&Arc<File>| !targets.contains(f.target());
        let mut files: Vec<_> = self.files.iter().filter(kept).cloned().collect();
        files.extend(added);
        let excluded = self.excluded.iter().filter(kept).cloned().collect();
        Ok(Self {
            files,
            excluded,
            ..self.clone()
        })
    }

    /// Environment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Original installation prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// All prefixes files may embed, the installation prefix first
    pub fn placeholders(&self) -> Vec<String> {
        std::iter::once(self.prefix.clone())
            .chain(self.placeholders.iter().cloned())
            .collect()
    }

    /// Included files in discovery order
    pub fn files(&self) -> &[Arc<File>] {
        &self.files
    }

    /// Number of included files
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if no file is included
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterate over included files
    pub fn iter(&self) -> impl Iterator<Item = &File> {
        self.files.iter().map(|f| f.as_ref())
    }

    /// Look up an included file by archive path
    pub fn get(&self, target: &str) -> Option<&File> {
        let target = normalize_target(target);
        self.iter().find(|f| f.target() == target)
    }

    /// Copy with the files matching `pattern` removed
    pub fn exclude(&self, pattern: &str) -> PackResult<Self> {
        let pattern = compile(pattern)?;
        let (removed, kept): (Vec<_>, Vec<_>) = self
            .files
            .iter()
            .cloned()
            .partition(|f| pattern.matches(f.target()));

        let mut excluded = self.excluded.clone();
        excluded.extend(removed);
        excluded.sort_by_key(|f| f.order);

        Ok(Self {
            files: kept,
            excluded,
            ..self.clone()
        })
    }

    /// Copy with previously excluded files matching `pattern` added back
    pub fn include(&self, pattern: &str) -> PackResult<Self> {
        let pattern = compile(pattern)?;
        let (restored, excluded): (Vec<_>, Vec<_>) = self
            .excluded
            .iter()
            .cloned()
            .partition(|f| pattern.matches(f.target()));

        let mut files = self.files.clone();
        files.extend(restored);
        files.sort_by_key(|f| f.order);

        Ok(Self {
            files,
            excluded,
            ..self.clone()
        })
    }

    /// Apply filters in order
    pub fn apply_filters(&self, filters: &[Filter]) -> PackResult<Self> {
        let mut env = self.clone();
        for filter in filters {
            env = match filter.kind {
                FilterKind::Include => env.include(&filter.pattern)?,
                FilterKind::Exclude => env.exclude(&filter.pattern)?,
            };
        }
        Ok(env)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Environment<name={:?}, prefix={:?}, files={}>",
            self.name,
            self.prefix,
            self.files.len()
        )
    }
}

impl<'a> IntoIterator for &'a Environment {
    type Item = &'a Arc<File>;
    type IntoIter = std::slice::Iter<'a, Arc<File>>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

fn compile(pattern: &str) -> PackResult<Pattern> {
    Pattern::new(&normalize_target(pattern))
        .map_err(|e| PackError::Config(format!("Invalid glob pattern '{}': {}", pattern, e)))
}
