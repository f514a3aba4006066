//! Error types for envsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// A watch payload or API document did not match the expected schema.
///
/// Always permanent: the offending item is logged and dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A required field was absent or empty.
    #[error("{document} document is missing required field `{field}`")]
    MissingField {
        document: &'static str,
        field: &'static str,
    },

    /// The document was present but its shape did not match the schema.
    #[error("malformed {document} document: {source}")]
    Malformed {
        document: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// The snapshot builder could not assemble a valid snapshot.
///
/// Permanent and non-retryable.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("application is missing required field `{0}`")]
    MissingField(&'static str),

    /// A managed resource carried a state string that is not a workload object.
    #[error("managed resource {resource} has an invalid {side} state: {source}")]
    InvalidState {
        resource: String,
        side: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from loading or saving the agent configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Parse failure on load, with file path and serde_yaml line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config not found at {path}; run `envsync init` first")]
    NotFound { path: PathBuf },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
