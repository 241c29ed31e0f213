//! Error types for session store operations.

/// Error type for session store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The session payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing database rejected or failed an operation.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The repository handle has been closed.
    #[error("Database connection is closed")]
    ConnectionClosed,

    /// No repository has been bound to the store yet.
    #[error("Session store is not connected")]
    NotConnected,

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A blocking repository task panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether this error means the backing store could not be reached or
    /// failed the operation.
    ///
    /// Store failures drive the connectivity state machine; payload and
    /// configuration errors are reported to the caller only.
    pub fn is_store_failure(&self) -> bool {
        !matches!(self, Self::Serialization(_) | Self::Config(_))
    }
}

/// Result type for session store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
