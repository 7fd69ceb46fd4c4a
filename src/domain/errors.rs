/// The error taxonomy in spec §7. Adapters (storage, transport) raise their
/// own lower-level errors as `anyhow::Error`; ports classify those into one of
/// these variants before they reach the push engine or event bus, so engine
/// control flow never matches on adapter-specific error types.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("unknown document type: {0}")]
    UnknownType(String),
}

impl SyncError {
    pub fn timeout(event: &str) -> Self {
        Self::Network(format!("Request timeout: {event}"))
    }

    /// Stable discriminant carried over the wire in `sync-operations` error
    /// responses (§6).
    pub fn wire_type(&self) -> &'static str {
        match self {
            SyncError::Network(_) => "NetworkError",
            SyncError::Authorization(_) => "AuthorizationError",
            SyncError::Validation(_) => "ValidationError",
            SyncError::Database(_) => "DatabaseError",
            SyncError::Storage(_) => "StorageError",
            SyncError::UnknownType(_) => "UnknownTypeError",
        }
    }

    /// Whether the push engine should treat this as a request-layer error
    /// (emit `sync` event, then retry unconditionally) per §7.
    pub fn is_retryable_at_push_layer(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_)
                | SyncError::Authorization(_)
                | SyncError::Validation(_)
                | SyncError::Database(_)
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_type_matches_taxonomy_strings() {
        assert_eq!(SyncError::Network("x".into()).wire_type(), "NetworkError");
        assert_eq!(
            SyncError::Authorization("x".into()).wire_type(),
            "AuthorizationError"
        );
        assert_eq!(SyncError::Validation("x".into()).wire_type(), "ValidationError");
        assert_eq!(
            SyncError::Database(anyhow::anyhow!("x")).wire_type(),
            "DatabaseError"
        );
        assert_eq!(SyncError::Storage(anyhow::anyhow!("x")).wire_type(), "StorageError");
        assert_eq!(
            SyncError::UnknownType("x".into()).wire_type(),
            "UnknownTypeError"
        );
    }

    #[test]
    fn storage_error_is_not_retryable_at_push_layer() {
        assert!(!SyncError::Storage(anyhow::anyhow!("x")).is_retryable_at_push_layer());
        assert!(SyncError::Network("x".into()).is_retryable_at_push_layer());
    }
}
