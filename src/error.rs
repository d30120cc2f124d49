//! Error types for prefix allocation.

/// Result type for allocator operations
pub type Result<T> = std::result::Result<T, AllocError>;

/// Prefix allocation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    /// Malformed seed prefix or allocation length out of range
    #[error("Invalid prefix allocation configuration: {0}")]
    InvalidConfiguration(String),

    /// A node's existing prefix is unparseable, has the wrong length, lies
    /// outside its zone, or is already owned by another node
    #[error("Invalid prefix assignment: {0}")]
    InvalidPrefixAssignment(String),

    /// No free node prefix or zone space remains
    #[error("Prefix space exhausted: {0}")]
    ExhaustedSpace(String),

    /// A referenced node, site or zone is not known
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
}
