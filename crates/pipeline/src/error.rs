//! Pipeline error types.

use shelfsheet_core::ValidationError;
use shelfsheet_metadata::MetadataError;
use shelfsheet_storage::StorageError;
use thiserror::Error;

/// Media normalization failure.
///
/// Validation runs before any upload, so only upload failures can leave
/// stored blobs behind; those are listed in `uploaded`.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("media upload failed ({} blob(s) already stored): {source}", .uploaded.len())]
    Upload {
        #[source]
        source: StorageError,
        uploaded: Vec<String>,
    },
}

impl NormalizeError {
    /// URLs stored before the failure.
    pub fn uploaded(&self) -> &[String] {
        match self {
            Self::Validation(_) => &[],
            Self::Upload { uploaded, .. } => uploaded,
        }
    }
}

/// Errors surfaced to callers of [`crate::SheetService`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid sheet: {0}")]
    InvalidSheet(String),

    #[error("media upload failed: {0}")]
    Upload(StorageError),

    /// The write was rolled back. Details are logged, not returned.
    #[error("failed to save sheet")]
    Transaction,

    #[error("sheet not found: {0}")]
    NotFound(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<NormalizeError> for PipelineError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::Validation(e) => Self::Validation(e),
            NormalizeError::Upload { source, .. } => Self::Upload(source),
        }
    }
}

impl From<shelfsheet_core::Error> for PipelineError {
    fn from(err: shelfsheet_core::Error) -> Self {
        match err {
            shelfsheet_core::Error::InvalidSheet(msg) => Self::InvalidSheet(msg),
            other => Self::InvalidSheet(other.to_string()),
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
