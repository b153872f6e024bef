use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Manifest not found: {}", .path.display())]
    ManifestNotFound { path: PathBuf },

    #[error("Manifest {} is corrupt: {reason}", .path.display())]
    ManifestCorrupt { path: PathBuf, reason: String },

    #[error("Shot index {index} is out of range (queue has {total} shots)")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("Job index {index} is out of range (queue has {total} jobs)")]
    JobOutOfRange { index: usize, total: usize },

    #[error("Invalid job submit time: {0}")]
    InvalidSubmitTime(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}
