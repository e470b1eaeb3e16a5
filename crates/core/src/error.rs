//! Domain error taxonomy.
//!
//! Every failure path in the engine maps to exactly one of these variants.
//! `Cancelled` is terminal bookkeeping, not a failure; callers must not log
//! it as an error or convert it into a `Failed` status write.

/// Domain-level error shared by all crates.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed request: unknown model, out-of-range threshold, bad options.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The referenced entity does not exist or is not visible to the caller.
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The caller does not own the target and has no accepted share access.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Device memory exhausted. Retryable: the pool performs exactly one
    /// automatic retry at half batch size before surfacing this.
    #[error("Device memory exhausted: {0}")]
    ResourceExhausted(String),

    /// An inference call exceeded its bound. Retryable failure, not a crash.
    #[error("Operation timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The job was cancelled. Short-circuits all downstream publication.
    #[error("Job was cancelled")]
    Cancelled,

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the workspace.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether a failed job carrying this error may be resubmitted as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::ResourceExhausted(_) | CoreError::Timeout { .. }
        )
    }
}
