use thiserror::Error;

/// Errors surfaced by the conversation store.
///
/// `NotFound` is deliberately returned both for sessions that do not exist
/// and for sessions that exist under a different tenant; callers must not be
/// able to distinguish the two. Error messages are tenant-neutral and never
/// carry another tenant's partition key.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found")]
    NotFound,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    ///
    /// Conflicts (e.g. an append racing a delete) and transient store
    /// failures are retryable; NotFound and validation failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Validation("title must not be empty".to_string());
        assert_eq!(err.to_string(), "validation error: title must not be empty");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::Conflict("racing delete".into()).is_retryable());
        assert!(StoreError::Unavailable("timeout".into()).is_retryable());
        assert!(!StoreError::NotFound.is_retryable());
        assert!(!StoreError::Validation("empty".into()).is_retryable());
    }
}
