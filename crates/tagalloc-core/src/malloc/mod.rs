//! Memory allocation.
//!
//! A boundary-tag heap with a segregated explicit free list:
//! - Every block carries a size/allocated header and a matching footer, so
//!   both physical neighbors are reachable in constant time.
//! - Free blocks are threaded through 24 power-of-two size classes, each
//!   kept in ascending size order, and fit is first-fit from the request's
//!   class upward.

pub mod allocator;
pub mod block;
pub mod check;
pub mod coalesce;
mod extend;
pub mod free_list;
pub mod log;
pub mod memlib;
pub mod size_class;

pub use allocator::Heap;
pub use block::{BlockKind, BoundaryTag, FreeLinks};
pub use check::{BlockInfo, Blocks, HeapStats};
pub use free_list::FreeListIndex;
pub use log::{AllocatorLogLevel, AllocatorLogRecord};
pub use memlib::{HeapSource, MemLib};
pub use size_class::{NUM_SIZE_CLASSES, bucket_for};
