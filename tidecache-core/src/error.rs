//! Error types surfaced by the cache core

/// Errors returned synchronously by store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("key not found")]
    KeyNotFound,
    #[error("key already exists")]
    KeyAlreadyExists,
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    MemoryLimit,
    #[error("stream error: {0}")]
    Stream(String),
    #[error("namespace error: {0}")]
    Namespace(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(CacheError::KeyNotFound.to_string(), "key not found");
        assert_eq!(CacheError::KeyAlreadyExists.to_string(), "key already exists");
        assert!(CacheError::WrongType.to_string().starts_with("WRONGTYPE"));
        assert!(CacheError::MemoryLimit.to_string().starts_with("OOM"));
        assert_eq!(
            CacheError::Namespace("default".to_string()).to_string(),
            "namespace error: default"
        );
    }
}
