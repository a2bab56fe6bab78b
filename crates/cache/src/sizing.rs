//! Automatic cache sizing
//!
//! Maps the space available on a volume to a target cache capacity. The
//! curve has six regions: a small volume donates 80% of its free space, a
//! comfortable one gets a fixed default, and progressively larger volumes
//! get a decreasing fraction, capped at what a 32-bit size field can hold.

/// Default capacity when the volume has room for it.
pub const DEFAULT_CACHE_SIZE: i64 = 80 * 1024 * 1024;

/// Capacity used by in-memory backends when none is given.
pub const DEFAULT_MEMORY_CACHE_SIZE: i64 = 8 * 1024 * 1024;

/// Hard ceiling on any configured or derived capacity.
pub const MAX_CACHE_SIZE: i64 = i32::MAX as i64;

/// Pick a cache capacity for a volume with `available` free bytes.
///
/// Monotonic non-decreasing in `available` and bounded by `i32::MAX`.
pub fn preferred_cache_size(available: i64) -> i64 {
    // Use most of a small volume.
    if available < DEFAULT_CACHE_SIZE * 10 / 8 {
        return available * 8 / 10;
    }

    // The default uses between 10% and 80% of the volume.
    if available < DEFAULT_CACHE_SIZE * 10 {
        return DEFAULT_CACHE_SIZE;
    }

    // 10% of the volume, until that passes 2.5x the default.
    if available < DEFAULT_CACHE_SIZE * 25 {
        return available / 10;
    }

    // 2.5x the default uses between 10% and 1% of the volume.
    if available < DEFAULT_CACHE_SIZE * 250 {
        return DEFAULT_CACHE_SIZE * 5 / 2;
    }

    // 1% of the volume, as long as it fits a 32-bit size.
    if available < MAX_CACHE_SIZE * 100 {
        return available / 100;
    }

    MAX_CACHE_SIZE
}
