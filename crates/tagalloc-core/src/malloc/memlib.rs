//! Heap-growth collaborator.
//!
//! The allocator never owns address space directly: it asks a
//! [`HeapSource`] to extend one contiguous region, sbrk-style, and addresses
//! that region by offset.

use crate::error::HeapError;

/// A monotonically growable byte region.
pub trait HeapSource {
    /// Extends the region by exactly `bytes` and returns the offset of the
    /// first new byte. Never extends partially.
    fn grow(&mut self, bytes: usize) -> Result<usize, HeapError>;

    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];

    /// Current region size in bytes.
    fn len(&self) -> usize {
        self.bytes().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful `grow` calls since the last reset.
    fn grow_calls(&self) -> usize;

    /// Releases the whole region.
    fn reset(&mut self);
}

/// `Vec`-backed region with a hard size limit.
#[derive(Debug, Clone)]
pub struct MemLib {
    heap: Vec<u8>,
    limit: usize,
    grow_calls: usize,
}

impl MemLib {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            heap: Vec::new(),
            limit,
            grow_calls: 0,
        }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes still available before `grow` starts failing.
    #[must_use]
    pub fn headroom(&self) -> usize {
        self.limit.saturating_sub(self.heap.len())
    }
}

impl HeapSource for MemLib {
    fn grow(&mut self, bytes: usize) -> Result<usize, HeapError> {
        let base = self.heap.len();
        match base.checked_add(bytes) {
            Some(end) if end <= self.limit => {
                self.heap.resize(end, 0);
                self.grow_calls += 1;
                Ok(base)
            }
            _ => Err(HeapError::OutOfMemory { requested: bytes }),
        }
    }

    fn bytes(&self) -> &[u8] {
        &self.heap
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.heap
    }

    fn grow_calls(&self) -> usize {
        self.grow_calls
    }

    fn reset(&mut self) {
        self.heap.clear();
        self.grow_calls = 0;
    }
}
