// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Malformed manifest input. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The manifest text is not valid JSON or has the wrong shape
    #[error("Invalid manifest syntax: {0}")]
    Syntax(String),

    /// A required field is absent
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field is present but its value is unusable
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Two variants of one manifest claim the same platform
    #[error("Manifest '{name}' has overlapping variants: {first} and {second}")]
    OverlappingVariants {
        name: String,
        first: String,
        second: String,
    },

    /// The same name and version was loaded twice
    #[error("Duplicate manifest: {name} {version}")]
    Duplicate { name: String, version: String },

    /// A manifest file failed to parse
    #[error("{}: {source}", path.display())]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<ParseError>,
    },
}

/// Resolution failures. All are fatal and user-actionable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("No manifest found for '{0}'")]
    NotFound(String),

    #[error("'{name}' has no variant for platform {platform}")]
    UnsupportedPlatform { name: String, platform: String },

    #[error("'{name}' requires {required}, host has {actual}")]
    UnsupportedOs {
        name: String,
        required: String,
        actual: String,
    },

    /// Carries the name of the installed package that conflicts
    #[error("Conflicts with installed package '{0}'")]
    Conflict(String),

    #[error("'{name}' has more than one variant matching {platform}")]
    AmbiguousVariant { name: String, platform: String },
}

/// Artifact retrieval failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Worth retrying (timeouts, connection resets, 5xx)
    #[error("Transient fetch failure for {url}: {reason}")]
    Transient { url: String, reason: String },

    /// Retrying will not help (4xx, missing file, bad URL)
    #[error("Fetch failed for {url}: {reason}")]
    Permanent { url: String, reason: String },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// Failures while executing install, uninstall or zap actions
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Artifact is missing '{0}' required by an install action")]
    MissingSource(String),

    #[error("Unsupported artifact format: {0}")]
    UnsupportedArtifact(String),

    #[error("Failed to unpack artifact: {0}")]
    Extract(String),

    #[error("Path escapes the install prefix: {0}")]
    UnsafePath(String),

    #[error("{path} is already owned by installed package '{owner}'")]
    PathOwned { path: String, owner: String },

    #[error("Timed out waiting for lock on package '{0}'")]
    LockTimeout(String),

    #[error("Package '{0}' is not installed")]
    NotInstalled(String),

    #[error("Failed to terminate '{process}': {reason}")]
    Quit { process: String, reason: String },

    /// A post-install smoke test did not behave as the manifest expects
    #[error("Test of '{name}' failed running {command}: {reason}")]
    TestFailed {
        name: String,
        command: String,
        reason: String,
    },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl InstallError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        InstallError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Core error types for Caskade
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Downloaded content does not match the manifest checksum
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error(transparent)]
    Install(#[from] InstallError),
}

impl Error {
    /// Process exit code for this error class
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Parse(_) => 2,
            Error::Resolution(ResolutionError::NotFound(_)) => 3,
            Error::Resolution(ResolutionError::Conflict(_)) => 5,
            Error::Resolution(_) => 4,
            Error::ChecksumMismatch { .. } => 6,
            Error::Fetch(_) => 7,
            Error::Install(_) => 8,
            Error::Database(_) | Error::Io(_) | Error::InitError(_) | Error::DatabaseNotFound(_) => 1,
        }
    }
}

/// Result type alias using Caskade's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_class() {
        let codes = [
            Error::Parse(ParseError::MissingField("name".to_string())).exit_code(),
            Error::Resolution(ResolutionError::NotFound("x".to_string())).exit_code(),
            Error::Resolution(ResolutionError::Conflict("y".to_string())).exit_code(),
            Error::ChecksumMismatch {
                expected: "a".to_string(),
                actual: "b".to_string(),
            }
            .exit_code(),
            Error::Fetch(FetchError::Permanent {
                url: "u".to_string(),
                reason: "404".to_string(),
            })
            .exit_code(),
            Error::Install(InstallError::NotInstalled("z".to_string())).exit_code(),
        ];

        let mut unique = codes.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0));
    }

    #[test]
    fn test_parse_error_names_missing_field() {
        let err = ParseError::MissingField("variants[0].url".to_string());
        assert!(err.to_string().contains("variants[0].url"));
    }
}
