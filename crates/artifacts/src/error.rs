//! Pipeline error types.

use depot_metadata::MetadataError;
use depot_storage::StorageError;

/// Errors raised by the artifact pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Unknown storage or repository.
    #[error("not found: {0}")]
    NotFound(String),

    /// Repository policy or permissions reject the operation.
    #[error("acceptance denied: {0}")]
    AcceptanceDenied(String),

    /// Coordinates violate the repository's version policy.
    #[error("version validation failed: {0}")]
    VersionValidation(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Failure reading the inbound stream.
    #[error("inbound stream error: {0}")]
    Inbound(#[from] std::io::Error),

    #[error("index error: {0}")]
    Index(#[from] MetadataError),

    /// Operation not implemented for the repository's layout.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Operation requires a repository policy the target does not have.
    #[error("invalid repository policy: {0}")]
    InvalidRepositoryPolicy(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ArtifactError {
    /// Stable identifier for logs, metrics and transport mappings.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AcceptanceDenied(_) => "acceptance_denied",
            Self::VersionValidation(_) => "version_validation",
            Self::Storage(_) | Self::Inbound(_) => "storage_error",
            Self::Index(_) => "index_error",
            Self::Unsupported(_) => "unsupported",
            Self::InvalidRepositoryPolicy(_) => "invalid_repository_policy",
            Self::InvalidPath(_) => "invalid_path",
            Self::Config(_) => "config_error",
        }
    }

    /// Whether the error rejects a write before any bytes moved.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::AcceptanceDenied(_) | Self::VersionValidation(_) | Self::InvalidPath(_)
        )
    }

    /// Whether the error is a storage failure on either the byte store or the index.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Inbound(_) | Self::Index(_))
    }
}

impl From<depot_core::Error> for ArtifactError {
    fn from(err: depot_core::Error) -> Self {
        match err {
            depot_core::Error::InvalidPath(msg) => Self::InvalidPath(msg),
            depot_core::Error::InvalidCoordinates(msg) => Self::VersionValidation(msg),
            depot_core::Error::Config(msg) => Self::Config(msg),
            other => Self::InvalidPath(other.to_string()),
        }
    }
}

/// Result type for pipeline operations.
pub type ArtifactResult<T> = std::result::Result<T, ArtifactError>;
