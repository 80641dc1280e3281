//! Segregated free-list index.
//!
//! One doubly linked list per size class. The links live inside the free
//! blocks themselves (see [`super::block`]); this struct only owns the list
//! heads plus per-bucket bookkeeping. Within a bucket blocks are kept in
//! ascending size order, so the first block that fits is also the tightest
//! fit in that bucket.

use super::block::{self, FreeLinks};
use super::size_class::{NUM_SIZE_CLASSES, bucket_for};

/// Heads of the per-class free lists.
#[derive(Debug, Clone)]
pub struct FreeListIndex {
    heads: [Option<usize>; NUM_SIZE_CLASSES],
    lens: [usize; NUM_SIZE_CLASSES],
    free_bytes: usize,
}

impl FreeListIndex {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            heads: [None; NUM_SIZE_CLASSES],
            lens: [0; NUM_SIZE_CLASSES],
            free_bytes: 0,
        }
    }

    /// Forgets every list. Used when the heap is re-initialized.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Splices a free block into its bucket, keeping ascending size order.
    ///
    /// The block's tags must already describe it as free at its final size.
    pub fn insert(&mut self, mem: &mut [u8], target: usize) {
        let size = block::header(mem, target).size();
        debug_assert!(!block::header(mem, target).is_allocated());
        let bucket = bucket_for(size);

        let mut before = None;
        let mut cursor = self.heads[bucket];
        while let Some(current) = cursor {
            if block::header(mem, current).size() >= size {
                break;
            }
            before = Some(current);
            cursor = block::read_links(mem, current).next;
        }

        block::write_links(
            mem,
            target,
            FreeLinks {
                prev: before,
                next: cursor,
            },
        );
        match before {
            Some(prev) => block::set_next_link(mem, prev, Some(target)),
            None => self.heads[bucket] = Some(target),
        }
        if let Some(next) = cursor {
            block::set_prev_link(mem, next, Some(target));
        }

        self.lens[bucket] += 1;
        self.free_bytes += size;
    }

    /// Unlinks a free block from its bucket and leaves its links detached.
    ///
    /// Must be called before the block's size changes: the bucket is derived
    /// from the size currently in its header.
    pub fn remove(&mut self, mem: &mut [u8], target: usize) {
        let size = block::header(mem, target).size();
        let bucket = bucket_for(size);
        let links = block::read_links(mem, target);

        match links.prev {
            Some(prev) => block::set_next_link(mem, prev, links.next),
            None => {
                debug_assert_eq!(self.heads[bucket], Some(target), "unlinking a non-head orphan");
                self.heads[bucket] = links.next;
            }
        }
        if let Some(next) = links.next {
            block::set_prev_link(mem, next, links.prev);
        }
        block::write_links(mem, target, FreeLinks::DETACHED);

        self.lens[bucket] -= 1;
        self.free_bytes -= size;
    }

    /// Finds a free block of at least `min_size` bytes.
    ///
    /// Scans buckets upward from the one `min_size` maps to and returns the
    /// first block large enough. `None` means the heap has to grow.
    #[must_use]
    pub fn find_fit(&self, mem: &[u8], min_size: usize) -> Option<usize> {
        for bucket in bucket_for(min_size)..NUM_SIZE_CLASSES {
            let mut cursor = self.heads[bucket];
            while let Some(current) = cursor {
                if block::header(mem, current).size() >= min_size {
                    return Some(current);
                }
                cursor = block::read_links(mem, current).next;
            }
        }
        None
    }

    #[must_use]
    pub fn head(&self, bucket: usize) -> Option<usize> {
        self.heads.get(bucket).copied().flatten()
    }

    /// Number of blocks in each bucket.
    #[must_use]
    pub fn occupancy(&self) -> [usize; NUM_SIZE_CLASSES] {
        self.lens
    }

    /// Total number of indexed blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lens.iter().sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of the sizes of every indexed block.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }
}

impl Default for FreeListIndex {
    fn default() -> Self {
        Self::new()
    }
}
