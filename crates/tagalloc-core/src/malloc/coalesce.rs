//! Boundary-tag coalescing.

use super::block;
use super::free_list::FreeListIndex;

/// Which physical neighbors were absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    None,
    Next,
    Prev,
    Both,
}

impl Merge {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Next => "next",
            Self::Prev => "prev",
            Self::Both => "both",
        }
    }
}

/// Result of coalescing one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coalesced {
    /// Header offset of the merged block.
    pub block: usize,
    pub size: usize,
    pub merge: Merge,
}

/// Merges a free, unindexed block with its free physical neighbors.
///
/// Neighbors are found through the boundary tags, never by scanning the
/// index. Absorbed neighbors are removed from `index`; the merged block is
/// returned unindexed and the caller inserts it. The prologue and epilogue
/// are tagged allocated, so merging never crosses them.
pub fn coalesce(mem: &mut [u8], index: &mut FreeListIndex, target: usize) -> Coalesced {
    debug_assert!(!block::header(mem, target).is_allocated());
    let size = block::header(mem, target).size();

    let prev = block::prev_block(mem, target);
    let next = target + size;
    let prev_free = !block::header(mem, prev).is_allocated();
    let next_free = !block::header(mem, next).is_allocated();

    match (prev_free, next_free) {
        (false, false) => Coalesced {
            block: target,
            size,
            merge: Merge::None,
        },
        (false, true) => {
            let merged = size + block::header(mem, next).size();
            index.remove(mem, next);
            block::set_tags(mem, target, merged, false);
            Coalesced {
                block: target,
                size: merged,
                merge: Merge::Next,
            }
        }
        (true, false) => {
            let merged = block::header(mem, prev).size() + size;
            index.remove(mem, prev);
            block::set_tags(mem, prev, merged, false);
            Coalesced {
                block: prev,
                size: merged,
                merge: Merge::Prev,
            }
        }
        (true, true) => {
            let merged =
                block::header(mem, prev).size() + size + block::header(mem, next).size();
            index.remove(mem, prev);
            index.remove(mem, next);
            block::set_tags(mem, prev, merged, false);
            Coalesced {
                block: prev,
                size: merged,
                merge: Merge::Both,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::malloc::block::{set_tags, write_epilogue};

    /// Prologue at 4, then blocks of `layout` (size, allocated) from 12, then
    /// an epilogue. Free blocks other than `skip` are indexed.
    fn build(layout: &[(usize, bool)], skip: usize) -> (Vec<u8>, FreeListIndex, Vec<usize>) {
        let total: usize = layout.iter().map(|(size, _)| size).sum();
        let mut mem = vec![0u8; 16 + total];
        set_tags(&mut mem, 4, 8, true);
        let mut index = FreeListIndex::new();
        let mut offsets = Vec::new();
        let mut at = 12;
        for &(size, allocated) in layout {
            set_tags(&mut mem, at, size, allocated);
            offsets.push(at);
            at += size;
        }
        write_epilogue(&mut mem, at);
        for (i, &(_, allocated)) in layout.iter().enumerate() {
            if !allocated && i != skip {
                index.insert(&mut mem, offsets[i]);
            }
        }
        (mem, index, offsets)
    }

    #[test]
    fn both_neighbors_allocated_is_a_no_op() {
        let (mut mem, mut index, offsets) = build(&[(32, true), (48, false), (32, true)], 1);
        let out = coalesce(&mut mem, &mut index, offsets[1]);
        assert_eq!(out.block, offsets[1]);
        assert_eq!(out.size, 48);
        assert_eq!(out.merge, Merge::None);
        assert!(index.is_empty());
    }

    #[test]
    fn merges_following_block() {
        let (mut mem, mut index, offsets) = build(&[(32, true), (48, false), (64, false)], 1);
        let out = coalesce(&mut mem, &mut index, offsets[1]);
        assert_eq!(out.merge, Merge::Next);
        assert_eq!(out.block, offsets[1]);
        assert_eq!(out.size, 112);
        assert_eq!(block::footer(&mem, out.block).size(), 112);
        assert!(index.is_empty());
    }

    #[test]
    fn merges_preceding_block() {
        let (mut mem, mut index, offsets) = build(&[(32, false), (48, false), (32, true)], 1);
        let out = coalesce(&mut mem, &mut index, offsets[1]);
        assert_eq!(out.merge, Merge::Prev);
        assert_eq!(out.block, offsets[0]);
        assert_eq!(out.size, 80);
        assert_eq!(block::header(&mem, offsets[0]), block::footer(&mem, offsets[0]));
        assert!(index.is_empty());
    }

    #[test]
    fn merges_both_neighbors() {
        let (mut mem, mut index, offsets) =
            build(&[(32, false), (48, false), (64, false), (16, true)], 1);
        let out = coalesce(&mut mem, &mut index, offsets[1]);
        assert_eq!(out.merge, Merge::Both);
        assert_eq!(out.block, offsets[0]);
        assert_eq!(out.size, 144);
        assert_eq!(block::next_block(&mem, out.block), offsets[3]);
        assert!(index.is_empty());
    }

    #[test]
    fn never_crosses_sentinels() {
        let (mut mem, mut index, offsets) = build(&[(64, false)], 0);
        let out = coalesce(&mut mem, &mut index, offsets[0]);
        assert_eq!(out.merge, Merge::None);
        assert_eq!(out.block, 12);
    }
}
