//! Boundary-tag block format.
//!
//! The heap is a byte buffer addressed by offsets. Every block starts with a
//! 4-byte header and ends with a 4-byte footer holding the same word: the
//! block size (a multiple of [`ALIGNMENT`]) with the allocated flag packed
//! into the low bit.
//!
//! ```text
//!  block offset                                   block offset + size
//!  |                                                                |
//!  v                                                                v
//!  +--------+----------------------------------------------+--------+
//!  | header |                payload                       | footer |
//!  +--------+----------------------------------------------+--------+
//!           ^
//!           payload offset (aligned to ALIGNMENT)
//! ```
//!
//! While a block is free the first two payload words hold its free-list
//! links. Those bytes belong to the caller once the block is allocated, so
//! they are only ever read through [`BlockKind::Free`].

use crate::config::MAX_HEAP_LIMIT;

/// Width of a boundary tag (header or footer) in bytes.
pub const WORD_SIZE: usize = 4;

/// Alignment of every block size and every payload offset.
pub const ALIGNMENT: usize = 8;

/// Header plus footer.
pub const OVERHEAD: usize = 2 * WORD_SIZE;

/// Smallest block able to hold its tags plus both free-list links.
pub const MIN_BLOCK_SIZE: usize = OVERHEAD + 2 * WORD_SIZE;

/// Offset of the prologue header (word 0 is alignment padding).
pub const PROLOGUE: usize = WORD_SIZE;

/// Size of the prologue block (header and footer, no payload).
pub const PROLOGUE_SIZE: usize = OVERHEAD;

/// Offset of the first real block header.
pub const FIRST_BLOCK: usize = PROLOGUE + PROLOGUE_SIZE;

/// Bytes of the heap that never belong to a real block: padding word,
/// prologue, and epilogue header.
pub const SENTINEL_OVERHEAD: usize = WORD_SIZE + PROLOGUE_SIZE + WORD_SIZE;

const ALLOCATED_BIT: u32 = 1;
const FLAG_MASK: u32 = (ALIGNMENT as u32) - 1;

// A block never outgrows the heap, and the heap is capped at
// `MAX_HEAP_LIMIT`, so every block size fits a tag word.
const _: () = assert!(MAX_HEAP_LIMIT <= u32::MAX as usize);

/// A decoded header/footer word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryTag(u32);

impl BoundaryTag {
    /// The zero-size allocated tag terminating the heap.
    pub const EPILOGUE: Self = Self(ALLOCATED_BIT);

    /// Packs a size and allocated flag.
    ///
    /// `size` must be a multiple of [`ALIGNMENT`]; anything else is a bug in
    /// the caller.
    #[must_use]
    pub fn new(size: usize, allocated: bool) -> Self {
        debug_assert_eq!(size % ALIGNMENT, 0, "unaligned block size {size}");
        debug_assert!(u32::try_from(size).is_ok(), "block size {size} overflows tag");
        // Lossless: size <= MAX_HEAP_LIMIT <= u32::MAX, checked above.
        Self(size as u32 | u32::from(allocated))
    }

    /// Reinterprets a raw word read from the heap.
    #[must_use]
    pub const fn from_word(word: u32) -> Self {
        Self(word)
    }

    /// Raw word as stored in the heap.
    #[must_use]
    pub const fn word(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn size(self) -> usize {
        (self.0 & !FLAG_MASK) as usize
    }

    #[must_use]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED_BIT != 0
    }

    /// True when any flag bit other than the allocated bit is set, which no
    /// well-formed tag ever has.
    #[must_use]
    pub const fn has_stray_bits(self) -> bool {
        self.0 & FLAG_MASK & !ALLOCATED_BIT != 0
    }
}

/// Encodes `(size, allocated)` into a header word.
#[must_use]
pub fn encode(size: usize, allocated: bool) -> u32 {
    BoundaryTag::new(size, allocated).word()
}

/// Decodes a header word into `(size, allocated)`.
#[must_use]
pub fn decode(word: u32) -> (usize, bool) {
    let tag = BoundaryTag::from_word(word);
    (tag.size(), tag.is_allocated())
}

/// Free-list links stored in a free block's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreeLinks {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

impl FreeLinks {
    /// Links of a block that belongs to no list.
    pub const DETACHED: Self = Self {
        prev: None,
        next: None,
    };
}

/// What a block currently is. A block is never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Allocated { payload: usize, usable: usize },
    Free { links: FreeLinks },
}

/// Rounds `value` up to a multiple of `align` (a power of two).
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Block size needed to hand out `payload` bytes, or `None` on overflow.
#[must_use]
pub fn adjusted_size(payload: usize) -> Option<usize> {
    if payload <= OVERHEAD {
        return Some(MIN_BLOCK_SIZE);
    }
    let raw = payload.checked_add(OVERHEAD + ALIGNMENT - 1)?;
    Some(raw & !(ALIGNMENT - 1))
}

#[must_use]
pub const fn payload_of(block: usize) -> usize {
    block + WORD_SIZE
}

#[must_use]
pub const fn block_of(payload: usize) -> usize {
    payload - WORD_SIZE
}

pub(crate) fn read_word(mem: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; WORD_SIZE];
    raw.copy_from_slice(&mem[at..at + WORD_SIZE]);
    u32::from_le_bytes(raw)
}

pub(crate) fn write_word(mem: &mut [u8], at: usize, word: u32) {
    mem[at..at + WORD_SIZE].copy_from_slice(&word.to_le_bytes());
}

pub(crate) fn header(mem: &[u8], block: usize) -> BoundaryTag {
    BoundaryTag::from_word(read_word(mem, block))
}

pub(crate) fn footer(mem: &[u8], block: usize) -> BoundaryTag {
    let size = header(mem, block).size();
    BoundaryTag::from_word(read_word(mem, block + size - WORD_SIZE))
}

/// Writes matching header and footer for a block of `size` bytes.
pub(crate) fn set_tags(mem: &mut [u8], block: usize, size: usize, allocated: bool) {
    let word = encode(size, allocated);
    write_word(mem, block, word);
    write_word(mem, block + size - WORD_SIZE, word);
}

pub(crate) fn write_epilogue(mem: &mut [u8], at: usize) {
    write_word(mem, at, BoundaryTag::EPILOGUE.word());
}

/// Header offset of the physically following block.
pub(crate) fn next_block(mem: &[u8], block: usize) -> usize {
    block + header(mem, block).size()
}

/// Header offset of the physically preceding block, found through its footer.
pub(crate) fn prev_block(mem: &[u8], block: usize) -> usize {
    let prev_size = BoundaryTag::from_word(read_word(mem, block - WORD_SIZE)).size();
    block - prev_size
}

fn link_to_word(link: Option<usize>) -> u32 {
    // Offset 0 is the padding word and never a block, so it doubles as "none".
    link.map_or(0, |offset| offset as u32)
}

fn word_to_link(word: u32) -> Option<usize> {
    (word != 0).then_some(word as usize)
}

pub(crate) fn read_links(mem: &[u8], block: usize) -> FreeLinks {
    FreeLinks {
        prev: word_to_link(read_word(mem, block + WORD_SIZE)),
        next: word_to_link(read_word(mem, block + 2 * WORD_SIZE)),
    }
}

pub(crate) fn write_links(mem: &mut [u8], block: usize, links: FreeLinks) {
    write_word(mem, block + WORD_SIZE, link_to_word(links.prev));
    write_word(mem, block + 2 * WORD_SIZE, link_to_word(links.next));
}

pub(crate) fn set_prev_link(mem: &mut [u8], block: usize, prev: Option<usize>) {
    write_word(mem, block + WORD_SIZE, link_to_word(prev));
}

pub(crate) fn set_next_link(mem: &mut [u8], block: usize, next: Option<usize>) {
    write_word(mem, block + 2 * WORD_SIZE, link_to_word(next));
}

/// Classifies the block at `block` by its header.
pub(crate) fn kind(mem: &[u8], block: usize) -> BlockKind {
    let tag = header(mem, block);
    if tag.is_allocated() {
        BlockKind::Allocated {
            payload: payload_of(block),
            usable: tag.size().saturating_sub(OVERHEAD),
        }
    } else {
        BlockKind::Free {
            links: read_links(mem, block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_keeps_flag_out_of_size() {
        let word = encode(4096, true);
        assert_eq!(word, 4097);
        assert_eq!(decode(word), (4096, true));
        assert_eq!(decode(encode(16, false)), (16, false));
    }

    #[test]
    fn largest_block_size_survives_encoding() {
        let tag = BoundaryTag::new(MAX_HEAP_LIMIT, true);
        assert_eq!(tag.size(), MAX_HEAP_LIMIT);
        assert!(tag.is_allocated());
        assert!(!tag.has_stray_bits());
        let below = MAX_HEAP_LIMIT - ALIGNMENT;
        assert_eq!(decode(encode(below, false)), (below, false));
    }

    #[test]
    fn epilogue_is_zero_sized_and_allocated() {
        assert_eq!(BoundaryTag::EPILOGUE.size(), 0);
        assert!(BoundaryTag::EPILOGUE.is_allocated());
    }

    #[test]
    fn stray_bits_are_detected() {
        assert!(!BoundaryTag::from_word(0x19).has_stray_bits());
        assert!(BoundaryTag::from_word(0x1a).has_stray_bits());
    }

    #[test]
    fn adjusted_size_matches_reference_rounding() {
        assert_eq!(adjusted_size(1), Some(16));
        assert_eq!(adjusted_size(8), Some(16));
        assert_eq!(adjusted_size(9), Some(24));
        assert_eq!(adjusted_size(50), Some(64));
        assert_eq!(adjusted_size(100), Some(112));
        assert_eq!(adjusted_size(200), Some(208));
        assert_eq!(adjusted_size(usize::MAX), None);
    }

    #[test]
    fn adjusted_size_is_identity_on_usable_payload() {
        for size in (MIN_BLOCK_SIZE..512).step_by(ALIGNMENT) {
            assert_eq!(adjusted_size(size - OVERHEAD), Some(size));
        }
    }

    #[test]
    fn footer_mirrors_header() {
        let mut mem = vec![0u8; 64];
        set_tags(&mut mem, 12, 24, true);
        assert_eq!(header(&mem, 12), footer(&mem, 12));
        assert_eq!(read_word(&mem, 12 + 24 - WORD_SIZE), encode(24, true));
        assert_eq!(next_block(&mem, 12), 36);
        set_tags(&mut mem, 36, 16, false);
        assert_eq!(prev_block(&mem, 36), 12);
    }

    #[test]
    fn links_roundtrip_and_detach() {
        let mut mem = vec![0u8; 64];
        set_tags(&mut mem, 12, 32, false);
        let links = FreeLinks {
            prev: Some(44),
            next: None,
        };
        write_links(&mut mem, 12, links);
        assert_eq!(kind(&mem, 12), BlockKind::Free { links });
        write_links(&mut mem, 12, FreeLinks::DETACHED);
        assert_eq!(read_links(&mem, 12), FreeLinks::DETACHED);
    }

    #[test]
    fn allocated_kind_reports_payload() {
        let mut mem = vec![0u8; 64];
        set_tags(&mut mem, 12, 40, true);
        assert_eq!(
            kind(&mem, 12),
            BlockKind::Allocated {
                payload: 16,
                usable: 32
            }
        );
        assert_eq!(block_of(payload_of(12)), 12);
    }

    #[test]
    fn payload_offsets_are_aligned_from_first_block() {
        assert_eq!(payload_of(FIRST_BLOCK) % ALIGNMENT, 0);
        assert_eq!(align_up(13, 8), 16);
        assert_eq!(align_up(16, 8), 16);
    }
}
