/// Errors raised while releasing registered resources.
#[derive(Debug, thiserror::Error)]
pub enum DisposeError {
    /// A cleanup routine reported a failure.
    #[error("cleanup failed: {0}")]
    CleanupFailed(String),
}

pub type Result<T> = std::result::Result<T, DisposeError>;
