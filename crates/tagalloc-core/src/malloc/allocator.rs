//! Core allocator state.
//!
//! [`Heap`] owns the growth collaborator, the segregated free-list index and
//! the lifecycle log, and implements the malloc family on top of them:
//! find-fit, place, extend on miss; free, coalesce, index; realloc by
//! shrinking in place, absorbing the next block, or relocating.
//!
//! Pointers are payload offsets into the heap region. Offset 0 is the
//! padding word and never a payload, so it plays the role of null.

use std::collections::VecDeque;

use super::block::{self, ALIGNMENT, FIRST_BLOCK, MIN_BLOCK_SIZE, OVERHEAD, WORD_SIZE};
use super::coalesce::{self, Coalesced};
use super::free_list::FreeListIndex;
use super::log::{AllocatorLogLevel, AllocatorLogRecord};
use super::memlib::{HeapSource, MemLib};
use super::size_class::bucket_for;
use crate::config::{HeapConfig, MAX_HEAP_LIMIT, SafetyLevel};
use crate::error::HeapError;

/// One explicit-free-list heap.
pub struct Heap<S: HeapSource = MemLib> {
    pub(super) source: S,
    pub(super) index: FreeListIndex,
    pub(super) config: HeapConfig,
    pub(super) initialized: bool,
    active_count: usize,
    next_decision_id: u64,
    lifecycle_logs: VecDeque<AllocatorLogRecord>,
    dropped_logs: u64,
}

impl Heap<MemLib> {
    /// Creates and initializes a heap backed by a [`MemLib`] bounded by
    /// `config.max_heap`.
    pub fn new(config: HeapConfig) -> Result<Self, HeapError> {
        let source = MemLib::new(config.max_heap);
        Self::with_source(source, config)
    }
}

impl<S: HeapSource> Heap<S> {
    /// Creates and initializes a heap over a caller-supplied growth source.
    pub fn with_source(source: S, config: HeapConfig) -> Result<Self, HeapError> {
        config.validate()?;
        let mut heap = Self {
            source,
            index: FreeListIndex::new(),
            config,
            initialized: false,
            active_count: 0,
            next_decision_id: 1,
            lifecycle_logs: VecDeque::new(),
            dropped_logs: 0,
        };
        heap.init()?;
        Ok(heap)
    }

    /// Discards the whole heap and lays out a fresh one: padding word,
    /// prologue, epilogue, and one initial free block.
    ///
    /// Every bucket, counter and log is reset first. On failure the heap is
    /// left uninitialized and every operation reports
    /// [`HeapError::Uninitialized`] until `init` succeeds.
    pub fn init(&mut self) -> Result<(), HeapError> {
        self.source.reset();
        self.index.reset();
        self.initialized = false;
        self.active_count = 0;
        self.next_decision_id = 1;
        self.lifecycle_logs.clear();
        self.dropped_logs = 0;

        let base = match self.source.grow(block::SENTINEL_OVERHEAD) {
            Ok(base) => base,
            Err(err) => {
                self.record(
                    AllocatorLogLevel::Error,
                    "init",
                    "heap_init",
                    None,
                    Some(block::SENTINEL_OVERHEAD),
                    None,
                    "oom",
                    err.to_string(),
                );
                return Err(err);
            }
        };
        if base != 0 {
            return Err(HeapError::InvalidConfig(format!(
                "growth source must start empty after reset, first byte at {base:#x}"
            )));
        }

        let mem = self.source.bytes_mut();
        block::write_word(mem, 0, 0);
        block::set_tags(mem, block::PROLOGUE, block::PROLOGUE_SIZE, true);
        block::write_epilogue(mem, FIRST_BLOCK);
        self.initialized = true;

        if let Err(err) = self.extend_heap("init", self.config.initial_extend) {
            self.initialized = false;
            self.record(
                AllocatorLogLevel::Error,
                "init",
                "heap_init",
                None,
                Some(self.config.initial_extend),
                None,
                "oom",
                err.to_string(),
            );
            return Err(err);
        }

        self.record(
            AllocatorLogLevel::Info,
            "init",
            "heap_init",
            None,
            Some(self.source.len()),
            None,
            "success",
            format!(
                "mode={} chunk_size={} max_heap={}",
                self.config.safety.as_str(),
                self.config.chunk_size,
                self.config.max_heap
            ),
        );
        Ok(())
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn record(
        &mut self,
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        bucket: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        if self.config.log_capacity == 0 {
            return;
        }
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("tagalloc::heap::{symbol}::{decision_id:016x}");
        while self.lifecycle_logs.len() >= self.config.log_capacity {
            self.lifecycle_logs.pop_front();
            self.dropped_logs += 1;
        }
        self.lifecycle_logs.push_back(AllocatorLogRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            ptr,
            size,
            bucket,
            outcome,
            details: details.into(),
            heap_size: self.source.len(),
            free_bytes: self.index.free_bytes(),
            active_count: self.active_count,
            grow_calls: self.source.grow_calls(),
        });
    }

    fn ensure_initialized(&mut self, symbol: &'static str) -> Result<(), HeapError> {
        if self.initialized {
            return Ok(());
        }
        self.record(
            AllocatorLogLevel::Warn,
            symbol,
            "uninitialized",
            None,
            None,
            None,
            "denied",
            "heap_not_initialized",
        );
        Err(HeapError::Uninitialized)
    }

    /// Runs the full consistency check when the safety level asks for it.
    ///
    /// Mutating calls run it before touching the heap, so damage done by a
    /// caller is reported without handing out or releasing any block, and
    /// again afterwards.
    fn consistency_gate(&mut self, symbol: &'static str) -> Result<(), HeapError> {
        if !self.config.safety.checks_after_mutation() {
            return Ok(());
        }
        match self.check_heap() {
            Ok(_) => Ok(()),
            Err(err) => {
                self.record(
                    AllocatorLogLevel::Error,
                    symbol,
                    "consistency_violation",
                    None,
                    None,
                    None,
                    "corrupted",
                    err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Allocates `size` bytes.
    ///
    /// Returns the payload offset, or `None` for `size == 0` and when the
    /// heap cannot grow.
    pub fn malloc(&mut self, size: usize) -> Option<usize> {
        self.try_malloc(size).ok().flatten()
    }

    /// [`Heap::malloc`] that reports why it failed. `Ok(None)` only for a
    /// zero-byte request, which touches no state.
    ///
    /// Under [`SafetyLevel::Hardened`] a heap found corrupted before the
    /// allocation yields [`HeapError::Corrupted`] with nothing allocated. A
    /// violation found only after placing the block also yields the error;
    /// that block stays allocated and unreachable.
    pub fn try_malloc(&mut self, size: usize) -> Result<Option<usize>, HeapError> {
        if size == 0 {
            return Ok(None);
        }
        self.ensure_initialized("malloc")?;
        self.consistency_gate("malloc")?;
        let ptr = self.allocate("malloc", size)?;
        self.consistency_gate("malloc")?;
        Ok(Some(ptr))
    }

    fn allocate(&mut self, symbol: &'static str, size: usize) -> Result<usize, HeapError> {
        self.ensure_initialized(symbol)?;

        let Some(asize) = block::adjusted_size(size).filter(|&asize| asize <= MAX_HEAP_LIMIT)
        else {
            self.record(
                AllocatorLogLevel::Warn,
                symbol,
                "oom",
                None,
                Some(size),
                None,
                "oom",
                "request_exceeds_block_format",
            );
            return Err(HeapError::OutOfMemory { requested: size });
        };

        let (found, path) = match self.index.find_fit(self.source.bytes(), asize) {
            Some(found) => (found, "fit"),
            None => {
                let grow_by = asize.max(self.config.chunk_size);
                match self.extend_heap(symbol, grow_by) {
                    Ok(found) => (found, "extend"),
                    Err(err) => {
                        self.record(
                            AllocatorLogLevel::Warn,
                            symbol,
                            "oom",
                            None,
                            Some(size),
                            Some(bucket_for(asize)),
                            "oom",
                            format!("grow_by={grow_by} headroom_exhausted"),
                        );
                        return Err(err);
                    }
                }
            }
        };

        let placed = self.place(found, asize);
        self.active_count += 1;
        let ptr = block::payload_of(placed);
        let block_size = block::header(self.source.bytes(), placed).size();
        self.record(
            AllocatorLogLevel::Trace,
            symbol,
            "alloc",
            Some(ptr),
            Some(size),
            Some(bucket_for(asize)),
            "success",
            format!("path={path} block_size={block_size}"),
        );
        Ok(ptr)
    }

    /// Carves `asize` bytes out of the indexed free block `target`.
    ///
    /// Leftovers smaller than a minimal block stay attached to the
    /// allocation. Leftovers of at least `back_split_threshold` bytes keep
    /// the front of the block and the allocation takes the back, so large
    /// requests cluster away from small ones; smaller leftovers go behind
    /// the allocation. Returns the allocated block's header offset.
    pub(super) fn place(&mut self, target: usize, asize: usize) -> usize {
        let threshold = self.config.back_split_threshold;
        let mem = self.source.bytes_mut();
        let size = block::header(mem, target).size();
        debug_assert!(size >= asize);
        self.index.remove(mem, target);

        let remainder = size - asize;
        if remainder < MIN_BLOCK_SIZE {
            block::set_tags(mem, target, size, true);
            return target;
        }

        if remainder >= threshold {
            block::set_tags(mem, target, remainder, false);
            let allocated = target + remainder;
            block::set_tags(mem, allocated, asize, true);
            self.index.insert(mem, target);
            allocated
        } else {
            block::set_tags(mem, target, asize, true);
            let rest = target + asize;
            block::set_tags(mem, rest, remainder, false);
            self.index.insert(mem, rest);
            target
        }
    }

    /// Marks `target` free, merges it with free neighbors and indexes the
    /// result.
    fn release(&mut self, target: usize) -> Coalesced {
        let mem = self.source.bytes_mut();
        let size = block::header(mem, target).size();
        block::set_tags(mem, target, size, false);
        let merged = coalesce::coalesce(mem, &mut self.index, target);
        self.index.insert(mem, merged.block);
        merged
    }

    /// Frees the block at `ptr`. Null is a no-op; invalid pointers and
    /// double frees are logged and ignored.
    pub fn free(&mut self, ptr: usize) {
        let _ = self.try_free(ptr);
    }

    /// [`Heap::free`] that reports rejected pointers.
    pub fn try_free(&mut self, ptr: usize) -> Result<(), HeapError> {
        if ptr == 0 {
            self.record(
                AllocatorLogLevel::Trace,
                "free",
                "free_null",
                None,
                None,
                None,
                "noop",
                "null_pointer",
            );
            return Ok(());
        }
        self.ensure_initialized("free")?;
        self.consistency_gate("free")?;
        let target = self.checked_block("free", ptr)?;
        let size = block::header(self.source.bytes(), target).size();
        let merged = self.release(target);
        self.active_count = self.active_count.saturating_sub(1);
        self.record(
            AllocatorLogLevel::Trace,
            "free",
            "free",
            Some(ptr),
            Some(size),
            Some(bucket_for(merged.size)),
            "success",
            format!("merge={} merged_size={}", merged.merge.as_str(), merged.size),
        );
        self.consistency_gate("free")
    }

    /// Resizes the allocation at `ptr` to `size` bytes.
    ///
    /// Null `ptr` behaves as `malloc`, zero `size` as `free` (returning
    /// `None`). Otherwise the block shrinks in place, grows into a free
    /// successor, or moves; bytes up to `min(old, new)` payload always
    /// survive. On failure the original allocation is untouched.
    pub fn realloc(&mut self, ptr: usize, size: usize) -> Option<usize> {
        self.try_realloc(ptr, size).ok().flatten()
    }

    /// [`Heap::realloc`] that reports why it failed. Hardened checks follow
    /// [`Heap::try_malloc`]: a heap corrupted beforehand leaves `ptr` as it
    /// was.
    pub fn try_realloc(&mut self, ptr: usize, size: usize) -> Result<Option<usize>, HeapError> {
        if ptr == 0 {
            let out = self.try_malloc(size)?;
            self.record(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_null_as_malloc",
                out,
                Some(size),
                None,
                if out.is_some() { "success" } else { "noop" },
                "ptr_was_null",
            );
            return Ok(out);
        }
        if size == 0 {
            self.try_free(ptr)?;
            self.record(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_zero_as_free",
                Some(ptr),
                Some(size),
                None,
                "freed",
                "new_size_was_zero",
            );
            return Ok(None);
        }

        self.ensure_initialized("realloc")?;
        self.consistency_gate("realloc")?;
        let target = self.checked_block("realloc", ptr)?;
        let Some(asize) = block::adjusted_size(size).filter(|&asize| asize <= MAX_HEAP_LIMIT)
        else {
            self.record(
                AllocatorLogLevel::Warn,
                "realloc",
                "oom",
                Some(ptr),
                Some(size),
                None,
                "oom",
                "request_exceeds_block_format",
            );
            return Err(HeapError::OutOfMemory { requested: size });
        };
        let current = block::header(self.source.bytes(), target).size();

        let out = if asize == current {
            self.record(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_in_place",
                Some(ptr),
                Some(size),
                Some(bucket_for(current)),
                "unchanged",
                format!("block_size={current}"),
            );
            ptr
        } else if asize < current {
            let outcome = if self.shrink_in_place(target, asize) {
                "split"
            } else {
                "unchanged"
            };
            self.record(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_shrink",
                Some(ptr),
                Some(size),
                Some(bucket_for(asize)),
                outcome,
                format!("old_block_size={current} wanted={asize}"),
            );
            ptr
        } else if self.grow_in_place(target, asize) {
            self.record(
                AllocatorLogLevel::Trace,
                "realloc",
                "realloc_grow_in_place",
                Some(ptr),
                Some(size),
                Some(bucket_for(asize)),
                "success",
                format!("old_block_size={current} wanted={asize}"),
            );
            ptr
        } else {
            self.relocate(ptr, target, size)?
        };

        self.consistency_gate("realloc")?;
        Ok(Some(out))
    }

    /// Splits the tail off an allocated block when it is large enough to
    /// stand alone, then frees and coalesces it.
    fn shrink_in_place(&mut self, target: usize, asize: usize) -> bool {
        let mem = self.source.bytes_mut();
        let current = block::header(mem, target).size();
        if current - asize < MIN_BLOCK_SIZE {
            return false;
        }
        block::set_tags(mem, target, asize, true);
        let tail = target + asize;
        block::set_tags(mem, tail, current - asize, false);
        let merged = coalesce::coalesce(mem, &mut self.index, tail);
        self.index.insert(mem, merged.block);
        true
    }

    /// Absorbs a free successor when the two together hold `asize` bytes.
    fn grow_in_place(&mut self, target: usize, asize: usize) -> bool {
        let mem = self.source.bytes_mut();
        let current = block::header(mem, target).size();
        let next = target + current;
        let next_tag = block::header(mem, next);
        if next_tag.is_allocated() || current + next_tag.size() < asize {
            return false;
        }

        let combined = current + next_tag.size();
        self.index.remove(mem, next);
        if combined - asize >= MIN_BLOCK_SIZE {
            block::set_tags(mem, target, asize, true);
            let rest = target + asize;
            block::set_tags(mem, rest, combined - asize, false);
            let merged = coalesce::coalesce(mem, &mut self.index, rest);
            self.index.insert(mem, merged.block);
        } else {
            block::set_tags(mem, target, combined, true);
        }
        true
    }

    /// Allocate-copy-free fallback of `realloc`.
    fn relocate(&mut self, ptr: usize, target: usize, size: usize) -> Result<usize, HeapError> {
        let old_usable = block::header(self.source.bytes(), target).size() - OVERHEAD;
        let new_ptr = match self.allocate("realloc", size) {
            Ok(new_ptr) => new_ptr,
            Err(err) => {
                self.record(
                    AllocatorLogLevel::Warn,
                    "realloc",
                    "realloc_allocate_new_failed",
                    Some(ptr),
                    Some(size),
                    None,
                    "oom",
                    format!("old_usable={old_usable}"),
                );
                return Err(err);
            }
        };

        let copy_len = old_usable.min(size);
        self.source
            .bytes_mut()
            .copy_within(ptr..ptr + copy_len, new_ptr);
        self.release(target);
        self.active_count = self.active_count.saturating_sub(1);
        self.record(
            AllocatorLogLevel::Trace,
            "realloc",
            "realloc_move",
            Some(new_ptr),
            Some(size),
            Some(bucket_for(size)),
            "success",
            format!("old_ptr={ptr:#x} copied={copy_len}"),
        );
        Ok(new_ptr)
    }

    /// Allocates zeroed space for `count` objects of `size` bytes.
    pub fn calloc(&mut self, count: usize, size: usize) -> Option<usize> {
        self.try_calloc(count, size).ok().flatten()
    }

    /// [`Heap::calloc`] that reports why it failed.
    pub fn try_calloc(&mut self, count: usize, size: usize) -> Result<Option<usize>, HeapError> {
        let Some(total) = count.checked_mul(size) else {
            self.record(
                AllocatorLogLevel::Warn,
                "calloc",
                "calloc_overflow",
                None,
                None,
                None,
                "denied",
                format!("count={count} size={size}"),
            );
            return Err(HeapError::OutOfMemory {
                requested: usize::MAX,
            });
        };
        let Some(ptr) = self.try_malloc(total)? else {
            return Ok(None);
        };
        let usable = block::header(self.source.bytes(), block::block_of(ptr)).size() - OVERHEAD;
        self.source.bytes_mut()[ptr..ptr + usable].fill(0);
        Ok(Some(ptr))
    }

    /// Validates `ptr` and logs why it was rejected.
    fn checked_block(&mut self, symbol: &'static str, ptr: usize) -> Result<usize, HeapError> {
        match self.locate(ptr) {
            Ok(target) => Ok(target),
            Err(err) => {
                let event = match err {
                    HeapError::DoubleFree { .. } => "double_free_detected",
                    _ => "invalid_pointer",
                };
                self.record(
                    AllocatorLogLevel::Warn,
                    symbol,
                    event,
                    Some(ptr),
                    None,
                    None,
                    "rejected",
                    err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Maps a payload offset back to the header of its allocated block.
    fn locate(&self, ptr: usize) -> Result<usize, HeapError> {
        if !self.initialized {
            return Err(HeapError::Uninitialized);
        }
        let invalid = |reason| HeapError::InvalidPointer { ptr, reason };
        let mem = self.source.bytes();
        let epilogue = mem.len() - WORD_SIZE;
        if ptr < block::payload_of(FIRST_BLOCK)
            || block::block_of(ptr).saturating_add(MIN_BLOCK_SIZE) > epilogue
        {
            return Err(invalid("outside heap"));
        }
        let target = block::block_of(ptr);
        if !self.config.safety.validation_enabled() {
            return Ok(target);
        }
        if ptr % ALIGNMENT != 0 {
            return Err(invalid("misaligned"));
        }

        let tag = block::header(mem, target);
        let size = tag.size();
        let plausible = !tag.has_stray_bits()
            && size >= MIN_BLOCK_SIZE
            && size % ALIGNMENT == 0
            && target + size <= epilogue;

        if self.config.safety == SafetyLevel::Hardened {
            let found = self
                .blocks()
                .take_while(|info| info.offset <= target)
                .find(|info| info.offset == target);
            match found {
                Some(info) if info.allocated => {}
                Some(_) => return Err(HeapError::DoubleFree { ptr }),
                // A block absorbed by coalescing keeps its stale free header.
                None if plausible && !tag.is_allocated() => {
                    return Err(HeapError::DoubleFree { ptr });
                }
                None => return Err(invalid("not a block payload")),
            }
        }

        if !plausible {
            return Err(invalid("corrupt header"));
        }
        if !tag.is_allocated() {
            return Err(HeapError::DoubleFree { ptr });
        }
        if block::footer(mem, target) != tag {
            return Err(invalid("header/footer mismatch"));
        }
        Ok(target)
    }

    /// Payload bytes available at `ptr`.
    #[must_use]
    pub fn usable_size(&self, ptr: usize) -> Option<usize> {
        let target = self.locate(ptr).ok()?;
        Some(block::header(self.source.bytes(), target).size() - OVERHEAD)
    }

    /// Borrows the payload of the allocation at `ptr`.
    #[must_use]
    pub fn payload(&self, ptr: usize) -> Option<&[u8]> {
        let usable = self.usable_size(ptr)?;
        self.source.bytes().get(ptr..ptr + usable)
    }

    /// Mutably borrows the payload of the allocation at `ptr`.
    pub fn payload_mut(&mut self, ptr: usize) -> Option<&mut [u8]> {
        let usable = self.usable_size(ptr)?;
        self.source.bytes_mut().get_mut(ptr..ptr + usable)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[must_use]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Number of live allocations.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Bytes obtained from the growth collaborator.
    #[must_use]
    pub fn heap_size(&self) -> usize {
        self.source.len()
    }

    #[must_use]
    pub fn grow_calls(&self) -> usize {
        self.source.grow_calls()
    }

    /// Bytes held by free blocks.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.index.free_bytes()
    }

    /// Returns a view of allocator lifecycle log records.
    #[must_use]
    pub fn lifecycle_logs(&self) -> &VecDeque<AllocatorLogRecord> {
        &self.lifecycle_logs
    }

    /// Drains allocator lifecycle log records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        self.lifecycle_logs.drain(..).collect()
    }

    /// Records discarded because the log was at capacity.
    #[must_use]
    pub fn dropped_logs(&self) -> u64 {
        self.dropped_logs
    }
}
