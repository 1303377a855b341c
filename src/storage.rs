/*!
 * In-Memory Storage Implementation
 *
 * The key-value map owned by the dispatcher. It has no internal locking:
 * the dispatcher thread is its only user, so every mutation is already
 * serialized by construction.
 */

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;

// AHash is considerably faster than SipHash for short byte-string keys
type AHash = BuildHasherDefault<ahash::AHasher>;

/// Byte-string to byte-string map
#[derive(Default)]
pub struct Store {
    inner: HashMap<Bytes, Bytes, AHash>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by key
    ///
    /// Lookups compare keys by exact byte equality.
    #[inline]
    pub fn get(&self, k: &[u8]) -> Option<&Bytes> {
        self.inner.get(k)
    }

    /// Insert or overwrite a key
    ///
    /// Insertion into an in-memory map cannot fail, so there is no error path.
    #[inline]
    pub fn set(&mut self, k: Bytes, v: Bytes) {
        self.inner.insert(k, v);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
