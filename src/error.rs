//! Error types for the Volume Snapshot Mirror Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Backup request or source snapshot content does not exist
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Source snapshot content has no resolved snapshot handle yet
    #[error("VolumeSnapshotContent {0} has no snapshot handle yet")]
    SourceNotReady(String),

    /// Transient failure talking to the API server
    #[error("Kubernetes API unavailable: {0}")]
    Unavailable(String),

    /// Concurrent modification detected while upserting
    #[error("Conflict while upserting {kind} {name}: {message}")]
    UpsertConflict {
        kind: &'static str,
        name: String,
        message: String,
    },

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a not-found error for the given resource kind
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Classify a kube client error raised while touching `kind`/`name`.
    ///
    /// 404 and 409 get their own variants, throttling, server-side and
    /// transport failures become [`Error::Unavailable`].
    pub fn from_kube(err: kube::Error, kind: &'static str, name: &str) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => Error::not_found(kind, name),
            kube::Error::Api(resp) if resp.code == 409 => Error::UpsertConflict {
                kind,
                name: name.to_string(),
                message: resp.message,
            },
            kube::Error::Api(resp) if resp.code == 429 || resp.code >= 500 => {
                Error::Unavailable(format!("{} {}: {}", kind, name, resp.message))
            }
            kube::Error::Api(resp) => Error::Kube(kube::Error::Api(resp)),
            kube::Error::HyperError(e) => Error::Unavailable(format!("{} {}: {}", kind, name, e)),
            kube::Error::Service(e) => Error::Unavailable(format!("{} {}: {}", kind, name, e)),
            other => Error::Kube(other),
        }
    }

    /// Whether the next reconciliation may succeed without the backup
    /// request changing
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SourceNotReady(_)
                | Error::Unavailable(_)
                | Error::UpsertConflict { .. }
                | Error::Kube(_)
        )
    }

    /// Short, stable label used for metrics and status reasons
    pub fn class(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "NotFound",
            Error::SourceNotReady(_) => "SourceNotReady",
            Error::Unavailable(_) => "Unavailable",
            Error::UpsertConflict { .. } => "UpsertConflict",
            Error::Kube(_) => "KubeError",
            Error::Config(_) => "ConfigError",
            Error::Validation(_) => "ValidationFailed",
            Error::Serialization(_) => "SerializationError",
        }
    }
}
