//! Error types for cache operations

mod conversions;
mod display;
mod types;

pub use types::{CacheError, Result};
