//! Domain-level error taxonomy for trajeval.
//!
//! Only structural and configuration problems are errors. Weak or negative
//! evidence is reported through [`crate::gate::GateResult`] instead.

use std::path::PathBuf;

/// Trajeval engine errors.
#[derive(Debug, thiserror::Error)]
pub enum TrajevalError {
    #[error("no log files found under {root}")]
    NoInputFiles { root: PathBuf },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("unsupported format for {path}: expected {expected}")]
    UnsupportedFormat { path: PathBuf, expected: String },

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: String, actual: String },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for trajeval operations.
pub type Result<T> = std::result::Result<T, TrajevalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_input_files_names_root() {
        let err = TrajevalError::NoInputFiles {
            root: PathBuf::from("/traces/empty"),
        };
        let msg = err.to_string();
        assert!(msg.contains("no log files"));
        assert!(msg.contains("/traces/empty"));
    }

    #[test]
    fn test_invalid_configuration_display() {
        let err = TrajevalError::InvalidConfiguration("bootstrap_samples must be > 0".to_string());
        assert!(err.to_string().contains("invalid configuration"));
        assert!(err.to_string().contains("bootstrap_samples"));
    }

    #[test]
    fn test_schema_version_mismatch_error() {
        let err = TrajevalError::SchemaVersionMismatch {
            expected: "trajeval.report.v1".to_string(),
            actual: "trajeval.report.v0".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("trajeval.report.v1"));
        assert!(msg.contains("trajeval.report.v0"));
    }
}
