use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record read or written by a transaction was modified by a
    /// concurrent committer before the transaction committed.
    #[error("Version conflict on {entity} {id}: expected version {expected}, found {actual}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        actual: u64,
    },

    /// A predicate query's result set changed underneath the transaction.
    #[error("Serialization conflict: {entity} table changed during transaction")]
    PredicateConflict { entity: &'static str },

    /// An update targeted a record that does not exist.
    #[error("Record not found: {entity} {id}")]
    RecordNotFound { entity: &'static str, id: String },

    /// An insert targeted an id that already exists.
    #[error("Duplicate record: {entity} {id}")]
    DuplicateRecord { entity: &'static str, id: String },

    /// An underlying backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns true if retrying the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::PredicateConflict { .. }
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
