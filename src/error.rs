//! Error types for envpack

use std::path::PathBuf;
use thiserror::Error;

/// Result type for pack operations
pub type PackResult<T> = Result<T, PackError>;

/// Errors that can occur during discovery, rewriting and packing
#[derive(Error, Debug)]
pub enum PackError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Conflicting or invalid options
    #[error("Configuration error: {0}")]
    Config(String),

    /// Output path exists and overwriting was not requested
    #[error("File {0} already exists (pass force to overwrite)")]
    OutputExists(PathBuf),

    /// Environment could not be found
    #[error("Environment not found: {0}")]
    EnvironmentNotFound(String),

    /// Path exists but is not an environment
    #[error("Not a valid environment: {0}")]
    NotAnEnvironment(PathBuf),

    /// Editable (development) installs cannot be relocated
    #[error("Editable packages found: {}", .0.join(", "))]
    EditableInstalls(Vec<String>),

    /// Two install records claim the same file
    #[error("Unsafe overlapping installs: {path} is owned by {}", .owners.join(" and "))]
    OverlappingInstalls {
        /// Path claimed more than once
        path: String,
        /// Packages claiming it
        owners: Vec<String>,
    },

    /// Package cache entries are missing and strict mode is enabled
    #[error("Missing package cache entries: {}", .0.join(", "))]
    MissingPackageCache(Vec<String>),

    /// Binary replacement would not fit in the space of the placeholder
    #[error(
        "Cannot rewrite {path}: destination '{destination}' ({} bytes) is longer than placeholder '{placeholder}' ({} bytes)",
        .destination.len(),
        .placeholder.len()
    )]
    PlaceholderTooLong {
        /// File being rewritten
        path: String,
        /// Placeholder detected in the file
        placeholder: String,
        /// Requested destination prefix
        destination: String,
    },

    /// Source file could not be read
    #[error("Cannot read {path}: {source}")]
    UnreadableSource {
        /// Path that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// File content changed class between classification and rewriting
    #[error("Encoding of {path} changed from {expected} to {found} while packing")]
    EncodingMismatch {
        /// File being rewritten
        path: String,
        /// Classification cached earlier
        expected: String,
        /// Classification of the bytes read for rewriting
        found: String,
    },

    /// Archive format capacity exceeded
    #[error("Archive limit exceeded: {0}")]
    ArchiveLimit(String),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Zip writer error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Overlay format error
    #[error("Invalid overlay format: {0}")]
    InvalidOverlay(String),
}

impl PackError {
    /// Errors raised while validating options, before any file I/O
    pub fn is_configuration(&self) -> bool {
        matches!(self, PackError::Config(_) | PackError::OutputExists(_))
    }

    /// Errors raised while discovering the environment
    pub fn is_discovery(&self) -> bool {
        matches!(
            self,
            PackError::EnvironmentNotFound(_)
                | PackError::NotAnEnvironment(_)
                | PackError::EditableInstalls(_)
                | PackError::OverlappingInstalls { .. }
                | PackError::MissingPackageCache(_)
        )
    }

    /// Errors raised while rewriting a single file
    pub fn is_rewrite(&self) -> bool {
        matches!(
            self,
            PackError::PlaceholderTooLong { .. }
                | PackError::UnreadableSource { .. }
                | PackError::EncodingMismatch { .. }
        )
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PackError::UnreadableSource {
            path: path.into(),
            source,
        }
    }
}
