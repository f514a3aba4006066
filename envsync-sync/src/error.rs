//! Error types for envsync-sync.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use envsync_core::error::{BuildError, DecodeError};

/// Whether a failed call may succeed if repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Network failure, timeout, throttling or 5xx.
    Retryable,
    /// Validation or authorisation rejection (4xx).
    Permanent,
}

/// Structured error returned by the remote service or the controller API.
///
/// The body fields mirror the remote service's JSON error document; `url` is
/// filled in by the client. `status` is `0` for transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Error)]
#[error("request to {url} failed ({status}): {code} - {message}")]
pub struct RemoteError {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(skip)]
    pub url: String,
}

impl RemoteError {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            name: String::new(),
            message: message.into(),
            url: String::new(),
        }
    }

    /// A failure below HTTP: DNS, connect, TLS, timeout, reset.
    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::new(0, "TRANSPORT", message)
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn class(&self) -> FailureClass {
        match self.status {
            0 | 408 | 425 | 429 => FailureClass::Retryable,
            500..=599 => FailureClass::Retryable,
            _ => FailureClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }
}

/// All errors that can arise while processing one item.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed input document. Permanent.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Snapshot could not be assembled. Permanent.
    #[error("build error: {0}")]
    Build(#[from] BuildError),

    /// Network / 5xx / timeout. The item is retried.
    #[error("transient failure: {0}")]
    Transient(#[source] RemoteError),

    /// 4xx rejection. Logged and dropped.
    #[error("rejected: {0}")]
    Rejected(#[source] RemoteError),

    /// Payload could not be serialized for the remote service.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err.class() {
            FailureClass::Retryable => SyncError::Transient(err),
            FailureClass::Permanent => SyncError::Rejected(err),
        }
    }
}
