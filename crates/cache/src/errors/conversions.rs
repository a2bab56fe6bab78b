//! Conversions between cache errors and other error types

use super::types::CacheError;

impl From<CacheError> for std::io::Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Io { source, .. } => source,
            CacheError::NotFound { .. } => {
                std::io::Error::new(std::io::ErrorKind::NotFound, err.to_string())
            }
            CacheError::AlreadyExists { .. } => {
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, err.to_string())
            }
            other => std::io::Error::other(other.to_string()),
        }
    }
}
