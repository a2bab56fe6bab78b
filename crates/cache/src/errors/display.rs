//! Display implementations for cache errors

use super::types::CacheError;
use std::fmt;

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "no cache entry for key '{key}'"),
            Self::AlreadyExists { key } => {
                write!(f, "a cache entry for key '{key}' already exists")
            }
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {} on '{}': {}",
                operation,
                path.display(),
                source
            ),
            Self::Init { path, reason } => write!(
                f,
                "cannot initialize cache at '{}': {}",
                path.display(),
                reason
            ),
            Self::CapacityExceeded { requested, limit } => write!(
                f,
                "write of {requested} bytes exceeds the per-entry limit of {limit} bytes"
            ),
            Self::Cancelled { operation } => write!(f, "{operation} was cancelled"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
