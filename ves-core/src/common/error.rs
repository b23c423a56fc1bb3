use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("duplicate key: {0}")]
    Conflict(String),

    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("storage unavailable: {message}")]
    Unavailable { message: String },

    #[error("cache error: {message}")]
    Cache { message: String },
}

impl PipelineError {
    /// Conflicts are benign: the unique (title, start, city) constraint fired,
    /// which the pipeline treats as an upsert hit rather than a failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PipelineError::Conflict(_))
    }

    /// Errors worth retrying with backoff, as opposed to permanent rejections.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Storage { .. } | PipelineError::Unavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
