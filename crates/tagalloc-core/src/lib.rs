//! # tagalloc-core
//!
//! A dynamic memory allocator over a single growable heap region.
//!
//! Pointers handed out by [`Heap`] are payload offsets into that region;
//! offset 0 is never a payload and serves as null. No `unsafe` code is
//! permitted at the crate level.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod malloc;

pub use config::{HeapConfig, SafetyLevel};
pub use error::{ConsistencyViolation, HeapError};
pub use malloc::{AllocatorLogLevel, AllocatorLogRecord, Heap, HeapSource, HeapStats, MemLib};
