use std::io;

use thiserror::Error;

use crate::types::SourceId;

/// Error type for record parsing, source access, configuration, and pipeline failures.
#[derive(Debug, Error)]
pub enum BatcherError {
    #[error("malformed record: {reason}")]
    MalformedRecord { reason: String },
    #[error("record source '{source_id}' is unavailable: {reason}")]
    SourceUnavailable { source_id: SourceId, reason: String },
    #[error("record source '{source_id}' reached end of stream in infinite mode")]
    SourceContract { source_id: SourceId },
    #[error("record source '{source_id}' has no usable records")]
    EmptySource { source_id: SourceId },
    #[error("batch pipeline failed: {reason}")]
    PipelineFailed { reason: String },
    #[error("vocabulary error: {0}")]
    Vocab(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BatcherError {
    /// Returns `true` for errors that must stop the whole pipeline instead of
    /// being recovered by a worker restart.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BatcherError::SourceContract { .. }
                | BatcherError::EmptySource { .. }
                | BatcherError::PipelineFailed { .. }
        )
    }
}
