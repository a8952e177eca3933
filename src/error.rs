//! Structured error types for the merge and resolution pipeline.

use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Structural errors
    PathNotFound,
    NoYamlFilesFound,
    TypeConflict,
    UnknownOutputFormat,
    InvalidDocument,
    EnclosingKeyNotFound,
    YamlParse,
    Io,
    NoLeafDirectories,

    // Resolution errors
    UnresolvedInterpolation,
    UnsupportedSecretType,
    MissingParameter,

    // Backend errors
    BackendFailure,
}

/// Coarse classification of an [`ErrorCode`].
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The input tree or the requested shape is unusable.
    Structural,
    /// A reference could not be resolved.
    Resolution,
    /// An external secret or state backend failed.
    Backend,
}

impl ErrorCode {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::PathNotFound
            | ErrorCode::NoYamlFilesFound
            | ErrorCode::TypeConflict
            | ErrorCode::UnknownOutputFormat
            | ErrorCode::InvalidDocument
            | ErrorCode::EnclosingKeyNotFound
            | ErrorCode::YamlParse
            | ErrorCode::Io
            | ErrorCode::NoLeafDirectories => ErrorCategory::Structural,
            ErrorCode::UnresolvedInterpolation
            | ErrorCode::UnsupportedSecretType
            | ErrorCode::MissingParameter => ErrorCategory::Resolution,
            ErrorCode::BackendFailure => ErrorCategory::Backend,
        }
    }
}

/// Structured error raised by every stage of the pipeline.
#[derive(Debug, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct StrataError {
    pub code: ErrorCode,
    pub message: String,
    /// Offending key path, file or token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl StrataError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            key: None,
            details: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    // Convenience constructors

    pub fn path_not_found(path: &Path) -> Self {
        Self::new(
            ErrorCode::PathNotFound,
            format!("Path does not exist: {}", path.display()),
        )
        .with_key(path.display().to_string())
    }

    pub fn no_yaml_files(target: &Path) -> Self {
        Self::new(
            ErrorCode::NoYamlFilesFound,
            format!(
                "No YAML files found to process in the hierarchy of {}",
                target.display()
            ),
        )
        .with_key(target.display().to_string())
    }

    pub fn no_leaf_directories(root: &Path, prefixes: &[String]) -> Self {
        Self::new(
            ErrorCode::NoLeafDirectories,
            format!(
                "No leaf directories found under {} (prefixes: {})",
                root.display(),
                prefixes.join(", ")
            ),
        )
        .with_key(root.display().to_string())
    }

    pub fn type_conflict(key: &str, base_type: &str, incoming_type: &str) -> Self {
        Self::new(
            ErrorCode::TypeConflict,
            format!(
                "Failed to merge key '{}', because of mismatch in type: {} vs {}",
                key, base_type, incoming_type
            ),
        )
        .with_key(key)
    }

    pub fn unknown_output_format(format: &str) -> Self {
        Self::new(
            ErrorCode::UnknownOutputFormat,
            format!("Unknown output format: {}", format),
        )
    }

    pub fn invalid_document(source: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidDocument,
            format!("Invalid document {}: {}", source, reason),
        )
        .with_key(source)
    }

    pub fn enclosing_key_not_found(key: &str) -> Self {
        Self::new(
            ErrorCode::EnclosingKeyNotFound,
            format!("Enclosing key '{}' not found in generated data", key),
        )
        .with_key(key)
    }

    pub fn yaml_parse(source: &Path, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::YamlParse,
            format!("Failed to parse YAML file {}: {}", source.display(), err),
        )
        .with_key(source.display().to_string())
    }

    pub fn io(path: &Path, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::Io,
            format!("I/O error on {}: {}", path.display(), err),
        )
        .with_key(path.display().to_string())
    }

    pub fn unresolved_interpolation(key: &str, value: &str) -> Self {
        Self::new(
            ErrorCode::UnresolvedInterpolation,
            format!(
                "Interpolation could not be resolved {} at '{}' and strict validation was enabled.",
                value, key
            ),
        )
        .with_key(key)
        .with_details(value)
    }

    pub fn unsupported_secret_type(secret_type: &str, params: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::UnsupportedSecretType,
            format!(
                "Could not resolve secret type '{}' with params {}. Check that a backend for it is configured.",
                secret_type, params
            ),
        )
        .with_key(secret_type)
    }

    pub fn missing_parameter(name: &str, params: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::MissingParameter,
            format!(
                "Could not find required key '{}' in the secret params: {}",
                name, params
            ),
        )
        .with_key(name)
    }

    pub fn backend(reference: &str, err: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::BackendFailure,
            format!("Backend failure while resolving {}: {}", reference, err),
        )
        .with_key(reference)
    }
}

/// Result type for pipeline operations.
pub type StrataResult<T> = std::result::Result<T, StrataError>;
