//! Reusable UTF-16 buffers for marshalling text to the managed side
//!
//! Buffers are pooled by availability only, never by content. The pool has
//! no eviction policy: it grows to the peak number of strings held at once.

use std::fmt;

/// UTF-16 text whose buffer came from a [`StringCache`]
#[derive(Clone, Default, PartialEq, Eq)]
pub struct NativeString {
    buffer: Vec<u16>,
}

impl NativeString {
    /// Code units, without a terminator
    pub fn as_slice(&self) -> &[u16] {
        &self.buffer
    }

    /// Length in UTF-16 code units
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.buffer)
    }

    pub(crate) fn into_buffer(self) -> Vec<u16> {
        self.buffer
    }
}

impl fmt::Debug for NativeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeString({:?})", self.to_string_lossy())
    }
}

impl fmt::Display for NativeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

/// Pool of string buffers
#[derive(Debug, Default)]
pub struct StringCache {
    pool: Vec<Vec<u16>>,
    allocated: usize,
}

impl StringCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pool: Vec::with_capacity(capacity),
            allocated: 0,
        }
    }

    /// An empty buffer able to hold at least `length_hint` code units.
    ///
    /// Pops the most recently released buffer (growing it when too small) or
    /// allocates a fresh one when the pool is empty.
    pub fn acquire(&mut self, length_hint: usize) -> Vec<u16> {
        match self.pool.pop() {
            Some(mut buffer) => {
                buffer.clear();
                buffer.reserve(length_hint);
                buffer
            }
            None => {
                self.allocated += 1;
                Vec::with_capacity(length_hint)
            }
        }
    }

    /// Return a buffer to the pool
    pub fn release(&mut self, buffer: Vec<u16>) {
        self.pool.push(buffer);
    }

    /// Encode `text` into a pooled buffer
    pub fn encode(&mut self, text: &str) -> NativeString {
        let mut buffer = self.acquire(text.len());
        buffer.extend(text.encode_utf16());
        NativeString { buffer }
    }

    /// Give the buffer of `text` back to the pool
    pub fn recycle(&mut self, text: NativeString) {
        self.release(text.into_buffer());
    }

    /// Buffers currently waiting in the pool
    pub fn pooled(&self) -> usize {
        self.pool.len()
    }

    /// Buffers ever allocated by this cache
    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn clear(&mut self) {
        self.pool.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_reuses_released_buffer() {
        let mut cache = StringCache::with_capacity(4);
        let text = cache.encode("hello");
        assert_eq!(text.len(), 5);
        assert_eq!(cache.allocated(), 1);

        cache.recycle(text);
        assert_eq!(cache.pooled(), 1);

        let again = cache.encode("hi");
        assert_eq!(again.to_string_lossy(), "hi");
        assert_eq!(cache.allocated(), 1);
        assert_eq!(cache.pooled(), 0);
    }

    #[test]
    fn test_acquire_grows_small_buffer() {
        let mut cache = StringCache::default();
        cache.release(Vec::with_capacity(2));
        let buffer = cache.acquire(64);
        assert!(buffer.capacity() >= 64);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_encode_non_ascii() {
        let mut cache = StringCache::default();
        let text = cache.encode("naïve 🦀");
        assert_eq!(text.to_string_lossy(), "naïve 🦀");
        // the crab needs a surrogate pair
        assert_eq!(text.len(), 8);
    }
}
