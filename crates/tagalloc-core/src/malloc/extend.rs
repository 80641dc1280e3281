//! Heap growth.

use super::allocator::Heap;
use super::block::{self, ALIGNMENT, WORD_SIZE};
use super::coalesce;
use super::log::AllocatorLogLevel;
use super::memlib::HeapSource;
use super::size_class::bucket_for;
use crate::error::HeapError;

impl<S: HeapSource> Heap<S> {
    /// Grows the heap by at least `min_bytes` and turns the new space into
    /// one free block.
    ///
    /// The old epilogue word becomes the new block's header and a fresh
    /// epilogue is written at the new end. The block is coalesced with a
    /// free predecessor and indexed. Returns its header offset. On failure
    /// nothing changes.
    pub(super) fn extend_heap(
        &mut self,
        symbol: &'static str,
        min_bytes: usize,
    ) -> Result<usize, HeapError> {
        let bytes = min_bytes
            .checked_add(ALIGNMENT - 1)
            .map(|raw| raw & !(ALIGNMENT - 1))
            .ok_or(HeapError::OutOfMemory {
                requested: min_bytes,
            })?;
        let base = self.source.grow(bytes)?;

        let mem = self.source.bytes_mut();
        let header = base - WORD_SIZE;
        debug_assert_eq!(block::header(mem, header), block::BoundaryTag::EPILOGUE);
        block::set_tags(mem, header, bytes, false);
        block::write_epilogue(mem, header + bytes);
        let merged = coalesce::coalesce(mem, &mut self.index, header);
        self.index.insert(mem, merged.block);

        self.record(
            AllocatorLogLevel::Debug,
            symbol,
            "extend_heap",
            Some(block::payload_of(merged.block)),
            Some(bytes),
            Some(bucket_for(merged.size)),
            "success",
            format!(
                "grown={bytes} merge={} block_size={} heap_size={}",
                merged.merge.as_str(),
                merged.size,
                self.source.len()
            ),
        );
        Ok(merged.block)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::HeapConfig;
    use crate::malloc::Heap;
    use crate::malloc::block::{FIRST_BLOCK, SENTINEL_OVERHEAD};

    #[test]
    fn extension_merges_with_trailing_free_block() {
        let mut heap = Heap::new(HeapConfig::default()).unwrap();
        let block = heap.extend_heap("test", 100).unwrap();
        // 64 initial bytes plus 100 rounded up to 104.
        assert_eq!(block, FIRST_BLOCK);
        assert_eq!(heap.free_bytes(), 64 + 104);
        assert_eq!(heap.heap_size(), SENTINEL_OVERHEAD + 64 + 104);
        assert_eq!(heap.stats().free_blocks, 1);
        heap.check_heap().unwrap();
    }

    #[test]
    fn extension_after_allocated_tail_stands_alone() {
        let mut heap = Heap::new(HeapConfig::default()).unwrap();
        let ptr = heap.malloc(56).unwrap();
        assert_eq!(heap.free_bytes(), 0);
        let block = heap.extend_heap("test", 32).unwrap();
        assert_eq!(block, FIRST_BLOCK + 64);
        assert_eq!(heap.free_bytes(), 32);
        assert_eq!(heap.usable_size(ptr), Some(56));
        heap.check_heap().unwrap();
    }

    #[test]
    fn failed_extension_changes_nothing() {
        let mut heap = Heap::new(HeapConfig::default().with_max_heap(128)).unwrap();
        let before = heap.stats();
        assert!(heap.extend_heap("test", 4096).is_err());
        assert_eq!(heap.stats(), before);
        heap.check_heap().unwrap();
    }
}
