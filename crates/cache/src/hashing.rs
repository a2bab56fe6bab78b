//! Key hashing for the bucket index

use xxhash_rust::xxh3::xxh3_64;

/// Hash a cache key. The full 64-bit hash is stored with each entry so that
/// bucket chains can be filtered without comparing whole keys.
pub fn hash_key(key: &str) -> u64 {
    xxh3_64(key.as_bytes())
}
