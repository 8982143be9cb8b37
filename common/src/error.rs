use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Extraction error: {0}")]
    Extraction(String),
    #[error("Build step '{step}' failed: {diagnostics}")]
    BuildStep { step: String, diagnostics: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Artifact missing: {0}")]
    ArtifactMissing(String),
    #[error("Invalid job transition: {from} -> {event}")]
    InvalidTransition { from: String, event: String },
    #[error("Build capacity exhausted: {0}")]
    Capacity(String),
    #[error("Build cancelled: {0}")]
    Cancelled(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to persist upload: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Errors a caller should surface as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ArtifactMissing(_))
    }
}
