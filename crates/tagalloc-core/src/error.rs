//! Allocator error taxonomy.
//!
//! Only [`HeapError::OutOfMemory`] is an expected runtime condition. The
//! pointer errors are caller contract violations detected best-effort, and
//! [`HeapError::Corrupted`] reports a broken internal invariant found by the
//! consistency checker.

use thiserror::Error;

/// Errors surfaced by the `try_*` allocator operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("out of memory: heap cannot grow by {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("invalid pointer {ptr:#x}: {reason}")]
    InvalidPointer { ptr: usize, reason: &'static str },
    #[error("double free of pointer {ptr:#x}")]
    DoubleFree { ptr: usize },
    #[error("heap is not initialized")]
    Uninitialized,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("heap corrupted: {0}")]
    Corrupted(#[from] ConsistencyViolation),
}

/// A specific broken heap invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyViolation {
    #[error("prologue or epilogue damaged at offset {offset:#x}")]
    SentinelDamaged { offset: usize },
    #[error("block {offset:#x}: header {header:#x} does not match footer {footer:#x}")]
    BadBoundaryTag {
        offset: usize,
        header: u32,
        footer: u32,
    },
    #[error("block {offset:#x}: size {size} is not aligned or below the minimum")]
    BadBlockSize { offset: usize, size: usize },
    #[error("block {offset:#x}: payload is not aligned")]
    MisalignedPayload { offset: usize },
    #[error("block {offset:#x}: size {size} runs past heap end {heap_end:#x}")]
    BlockOverrun {
        offset: usize,
        size: usize,
        heap_end: usize,
    },
    #[error("adjacent free blocks at {first:#x} and {second:#x}")]
    AdjacentFreeBlocks { first: usize, second: usize },
    #[error("free block {offset:#x} ({size} bytes) is not indexed")]
    UnindexedFreeBlock { offset: usize, size: usize },
    #[error("indexed block {offset:#x} is not a free block")]
    IndexedNonFreeBlock { offset: usize },
    #[error("block {offset:#x} of {size} bytes indexed in bucket {bucket}, expected {expected}")]
    WrongBucket {
        offset: usize,
        size: usize,
        bucket: usize,
        expected: usize,
    },
    #[error("bucket {bucket}: broken back link at block {offset:#x}")]
    BrokenLink { bucket: usize, offset: usize },
    #[error("bucket {bucket}: block {offset:#x} breaks ascending size order")]
    UnsortedBucket { bucket: usize, offset: usize },
    #[error("bucket {bucket} does not terminate")]
    IndexCycle { bucket: usize },
    #[error("block bytes {blocks} + sentinel bytes {sentinels} != grown bytes {grown}")]
    ByteAccounting {
        blocks: usize,
        sentinels: usize,
        grown: usize,
    },
    #[error("index tracks {tracked} free bytes, heap walk found {counted}")]
    FreeByteCounter { tracked: usize, counted: usize },
}
