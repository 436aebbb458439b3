use thiserror::Error;

/// Errors produced while parsing request parameters into typed values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid lock mode: {0}")]
    InvalidLockMode(String),

    #[error("invalid path processing strategy: {0}")]
    InvalidPathProcessingStrategy(String),

    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),
}

/// Result alias for type-level parsing.
pub type Result<T> = std::result::Result<T, TypesError>;
