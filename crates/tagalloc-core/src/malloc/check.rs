//! Heap walking, statistics and the full consistency check.

use std::collections::BTreeSet;

use super::allocator::Heap;
use super::block::{self, ALIGNMENT, FIRST_BLOCK, MIN_BLOCK_SIZE, PROLOGUE, PROLOGUE_SIZE, WORD_SIZE};
use super::memlib::HeapSource;
use super::size_class::{NUM_SIZE_CLASSES, bucket_for};
use crate::error::{ConsistencyViolation, HeapError};

/// Snapshot of heap occupancy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes obtained from the growth collaborator, sentinels included.
    pub heap_size: usize,
    pub free_bytes: usize,
    /// Bytes in allocated blocks, tags included.
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub allocated_blocks: usize,
    pub largest_free: usize,
    /// Indexed blocks per size class.
    pub bucket_occupancy: [usize; NUM_SIZE_CLASSES],
    pub grow_calls: usize,
    pub active_count: usize,
}

/// One regular block seen by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Header offset.
    pub offset: usize,
    pub size: usize,
    pub allocated: bool,
}

impl BlockInfo {
    #[must_use]
    pub const fn payload(&self) -> usize {
        block::payload_of(self.offset)
    }
}

/// Address-order walk from the first block to the epilogue.
///
/// Stops early at a tag that cannot be followed safely.
pub struct Blocks<'a> {
    mem: &'a [u8],
    cursor: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let epilogue = self.mem.len().checked_sub(WORD_SIZE)?;
        if self.cursor >= epilogue {
            return None;
        }
        let tag = block::header(self.mem, self.cursor);
        let size = tag.size();
        if size < MIN_BLOCK_SIZE || self.cursor + size > epilogue {
            self.cursor = epilogue;
            return None;
        }
        let info = BlockInfo {
            offset: self.cursor,
            size,
            allocated: tag.is_allocated(),
        };
        self.cursor += size;
        Some(info)
    }
}

impl<S: HeapSource> Heap<S> {
    /// Walks every regular block in address order.
    #[must_use]
    pub fn blocks(&self) -> Blocks<'_> {
        let mem: &[u8] = if self.initialized {
            self.source.bytes()
        } else {
            &[]
        };
        Blocks {
            mem,
            cursor: FIRST_BLOCK,
        }
    }

    /// Occupancy snapshot. Does not validate; see [`Heap::check_heap`].
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_size: self.source.len(),
            bucket_occupancy: self.index.occupancy(),
            grow_calls: self.source.grow_calls(),
            active_count: self.active_count(),
            ..HeapStats::default()
        };
        for info in self.blocks() {
            if info.allocated {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += info.size;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += info.size;
                stats.largest_free = stats.largest_free.max(info.size);
            }
        }
        stats
    }

    /// Verifies every structural invariant of the heap and its index.
    ///
    /// Read-only. Checks the sentinels; every block's tags, size, alignment
    /// and extent; that no two free blocks are adjacent; that block bytes
    /// plus sentinels equal the grown bytes; and that the index holds
    /// exactly the free blocks, each in its size class, with consistent
    /// links and ascending sizes.
    pub fn check_heap(&self) -> Result<HeapStats, HeapError> {
        if !self.initialized {
            return Err(HeapError::Uninitialized);
        }
        let mem = self.source.bytes();
        let grown = mem.len();
        if grown < block::SENTINEL_OVERHEAD {
            return Err(ConsistencyViolation::SentinelDamaged { offset: 0 }.into());
        }

        let prologue = block::BoundaryTag::new(PROLOGUE_SIZE, true);
        if block::header(mem, PROLOGUE) != prologue
            || block::read_word(mem, PROLOGUE + PROLOGUE_SIZE - WORD_SIZE) != prologue.word()
        {
            return Err(ConsistencyViolation::SentinelDamaged { offset: PROLOGUE }.into());
        }
        let epilogue = grown - WORD_SIZE;
        if block::header(mem, epilogue) != block::BoundaryTag::EPILOGUE {
            return Err(ConsistencyViolation::SentinelDamaged { offset: epilogue }.into());
        }

        let mut free_blocks = BTreeSet::new();
        let mut free_counted = 0usize;
        let mut block_bytes = 0usize;
        let mut prev_free: Option<usize> = None;
        let mut cursor = FIRST_BLOCK;
        while cursor < epilogue {
            let tag = block::header(mem, cursor);
            let size = tag.size();
            if tag.has_stray_bits() || size < MIN_BLOCK_SIZE || size % ALIGNMENT != 0 {
                return Err(ConsistencyViolation::BadBlockSize {
                    offset: cursor,
                    size,
                }
                .into());
            }
            if cursor + size > epilogue {
                return Err(ConsistencyViolation::BlockOverrun {
                    offset: cursor,
                    size,
                    heap_end: epilogue,
                }
                .into());
            }
            let footer = block::read_word(mem, cursor + size - WORD_SIZE);
            if footer != tag.word() {
                return Err(ConsistencyViolation::BadBoundaryTag {
                    offset: cursor,
                    header: tag.word(),
                    footer,
                }
                .into());
            }
            if block::payload_of(cursor) % ALIGNMENT != 0 {
                return Err(ConsistencyViolation::MisalignedPayload { offset: cursor }.into());
            }

            if tag.is_allocated() {
                prev_free = None;
            } else {
                if let Some(first) = prev_free {
                    return Err(ConsistencyViolation::AdjacentFreeBlocks {
                        first,
                        second: cursor,
                    }
                    .into());
                }
                free_blocks.insert(cursor);
                free_counted += size;
                prev_free = Some(cursor);
            }
            block_bytes += size;
            cursor += size;
        }

        if block_bytes + block::SENTINEL_OVERHEAD != grown {
            return Err(ConsistencyViolation::ByteAccounting {
                blocks: block_bytes,
                sentinels: block::SENTINEL_OVERHEAD,
                grown,
            }
            .into());
        }

        let mut indexed = BTreeSet::new();
        for bucket in 0..NUM_SIZE_CLASSES {
            let mut prev: Option<usize> = None;
            let mut prev_size = 0usize;
            let mut steps = 0usize;
            let mut current = self.index.head(bucket);
            while let Some(offset) = current {
                if !free_blocks.contains(&offset) {
                    return Err(ConsistencyViolation::IndexedNonFreeBlock { offset }.into());
                }
                steps += 1;
                if steps > free_blocks.len() {
                    return Err(ConsistencyViolation::IndexCycle { bucket }.into());
                }
                let size = block::header(mem, offset).size();
                let expected = bucket_for(size);
                if expected != bucket {
                    return Err(ConsistencyViolation::WrongBucket {
                        offset,
                        size,
                        bucket,
                        expected,
                    }
                    .into());
                }
                let links = block::read_links(mem, offset);
                if links.prev != prev {
                    return Err(ConsistencyViolation::BrokenLink { bucket, offset }.into());
                }
                if size < prev_size {
                    return Err(ConsistencyViolation::UnsortedBucket { bucket, offset }.into());
                }
                indexed.insert(offset);
                prev = Some(offset);
                prev_size = size;
                current = links.next;
            }
        }

        if let Some(&offset) = free_blocks.difference(&indexed).next() {
            let size = block::header(mem, offset).size();
            return Err(ConsistencyViolation::UnindexedFreeBlock { offset, size }.into());
        }
        if self.index.free_bytes() != free_counted {
            return Err(ConsistencyViolation::FreeByteCounter {
                tracked: self.index.free_bytes(),
                counted: free_counted,
            }
            .into());
        }

        Ok(self.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;

    fn heap() -> Heap {
        Heap::new(HeapConfig::default()).unwrap()
    }

    #[test]
    fn fresh_heap_has_one_free_block() {
        let heap = heap();
        let stats = heap.check_heap().unwrap();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.allocated_blocks, 0);
        assert_eq!(stats.free_bytes, 64);
        assert_eq!(stats.largest_free, 64);
        assert_eq!(stats.bucket_occupancy[bucket_for(64)], 1);
        let blocks: Vec<BlockInfo> = heap.blocks().collect();
        assert_eq!(
            blocks,
            vec![BlockInfo {
                offset: FIRST_BLOCK,
                size: 64,
                allocated: false
            }]
        );
    }

    #[test]
    fn stats_account_for_every_byte() {
        let mut heap = heap();
        let a = heap.malloc(10).unwrap();
        let _b = heap.malloc(300).unwrap();
        heap.free(a);
        let stats = heap.check_heap().unwrap();
        assert_eq!(
            stats.free_bytes + stats.allocated_bytes + block::SENTINEL_OVERHEAD,
            stats.heap_size
        );
        assert_eq!(stats.allocated_blocks, 1);
        assert_eq!(stats.active_count, 1);
    }

    #[test]
    fn detects_damaged_epilogue() {
        let mut heap = heap();
        let end = heap.heap_size() - WORD_SIZE;
        block::write_word(heap.source.bytes_mut(), end, 0);
        assert_eq!(
            heap.check_heap(),
            Err(ConsistencyViolation::SentinelDamaged { offset: end }.into())
        );
    }

    #[test]
    fn detects_adjacent_free_blocks() {
        let mut heap = heap();
        // Split the initial free block behind the index's back.
        let mem = heap.source.bytes_mut();
        block::set_tags(mem, FIRST_BLOCK, 32, false);
        block::set_tags(mem, FIRST_BLOCK + 32, 32, false);
        assert_eq!(
            heap.check_heap(),
            Err(ConsistencyViolation::AdjacentFreeBlocks {
                first: FIRST_BLOCK,
                second: FIRST_BLOCK + 32
            }
            .into())
        );
    }

    #[test]
    fn detects_unindexed_free_block() {
        let mut heap = heap();
        let ptr = heap.malloc(56).unwrap();
        let target = block::block_of(ptr);
        block::set_tags(heap.source.bytes_mut(), target, 64, false);
        assert_eq!(
            heap.check_heap(),
            Err(ConsistencyViolation::UnindexedFreeBlock {
                offset: target,
                size: 64
            }
            .into())
        );
    }

    #[test]
    fn detects_indexed_allocated_block() {
        let mut heap = heap();
        block::set_tags(heap.source.bytes_mut(), FIRST_BLOCK, 64, true);
        assert_eq!(
            heap.check_heap(),
            Err(ConsistencyViolation::IndexedNonFreeBlock {
                offset: FIRST_BLOCK
            }
            .into())
        );
    }

    #[test]
    fn detects_broken_back_link() {
        let mut heap = heap();
        block::set_prev_link(heap.source.bytes_mut(), FIRST_BLOCK, Some(0x40));
        assert_eq!(
            heap.check_heap(),
            Err(ConsistencyViolation::BrokenLink {
                bucket: bucket_for(64),
                offset: FIRST_BLOCK
            }
            .into())
        );
    }

    #[test]
    fn detects_block_overrun() {
        let mut heap = heap();
        block::write_word(
            heap.source.bytes_mut(),
            FIRST_BLOCK,
            block::encode(4096, false),
        );
        assert!(matches!(
            heap.check_heap(),
            Err(HeapError::Corrupted(ConsistencyViolation::BlockOverrun { .. }))
        ));
        // The walk stops instead of running off the heap.
        assert_eq!(heap.blocks().count(), 0);
    }
}
