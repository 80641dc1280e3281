//! Trace replay engine.

use std::collections::BTreeMap;

use tagalloc_core::{AllocatorLogLevel, AllocatorLogRecord, Heap, HeapConfig, HeapError};

use crate::report::{TraceReport, sha256_hex};
use crate::trace::{Trace, TraceOp};

/// Byte written at `offset` of the payload owned by trace id `id`.
#[must_use]
pub fn pattern_byte(id: usize, offset: usize) -> u8 {
    (id.wrapping_mul(131) ^ offset.wrapping_mul(7)) as u8
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    ptr: usize,
    size: usize,
}

/// Result of replaying one trace.
#[derive(Debug, Clone)]
pub struct TraceRun {
    pub report: TraceReport,
    /// Warn and Error lifecycle records emitted during the replay.
    pub notable: Vec<AllocatorLogRecord>,
}

/// Replays traces against fresh heaps.
#[derive(Debug, Clone)]
pub struct TraceRunner {
    pub config: HeapConfig,
    /// Run the full heap check after every operation.
    pub check_each_op: bool,
}

impl TraceRunner {
    #[must_use]
    pub fn new(config: HeapConfig) -> Self {
        Self {
            config,
            check_each_op: false,
        }
    }

    #[must_use]
    pub fn with_checks(mut self, check_each_op: bool) -> Self {
        self.check_each_op = check_each_op;
        self
    }

    /// Replays `trace`. Allocator and verification failures are collected in
    /// the report instead of aborting, except a failed heap check, which
    /// stops the replay.
    pub fn run(&self, trace: &Trace) -> Result<TraceRun, HeapError> {
        let mut heap = Heap::new(self.config.clone())?;
        let mut replay = Replay {
            heap: &mut heap,
            slots: Vec::with_capacity(trace.num_ids.min(trace.ops.len())),
            live: BTreeMap::new(),
            live_bytes: 0,
            peak_live_bytes: 0,
            failures: Vec::new(),
            notable: Vec::new(),
            warn_events: 0,
            error_events: 0,
        };

        for (index, op) in trace.ops.iter().enumerate() {
            replay.apply(index, *op);
            if self.check_each_op
                && let Err(err) = replay.heap.check_heap()
            {
                replay.failures.push(format!("op {index}: heap check failed: {err}"));
                replay.collect_logs();
                break;
            }
            replay.peak_live_bytes = replay.peak_live_bytes.max(replay.live_bytes);
            replay.collect_logs();
        }

        let Replay {
            peak_live_bytes,
            failures,
            notable,
            warn_events,
            error_events,
            ..
        } = replay;
        let heap_size = heap.heap_size();
        let utilization = if heap_size == 0 {
            0.0
        } else {
            peak_live_bytes as f64 / heap_size as f64
        };

        Ok(TraceRun {
            report: TraceReport {
                name: trace.name.clone(),
                sha256: sha256_hex(trace.to_text().as_bytes()),
                mode: self.config.safety.as_str().to_string(),
                ops: trace.ops.len(),
                grow_calls: heap.grow_calls(),
                heap_size,
                peak_live_bytes,
                utilization,
                warn_events,
                error_events,
                failures,
            },
            notable,
        })
    }
}

struct Replay<'h> {
    heap: &'h mut Heap,
    slots: Vec<Option<Slot>>,
    /// Live payload ranges, start to end.
    live: BTreeMap<usize, usize>,
    live_bytes: usize,
    peak_live_bytes: usize,
    failures: Vec<String>,
    notable: Vec<AllocatorLogRecord>,
    warn_events: usize,
    error_events: usize,
}

impl Replay<'_> {
    fn apply(&mut self, index: usize, op: TraceOp) {
        match op {
            TraceOp::Alloc { id, size } => {
                if self.slot(id).is_some() {
                    self.failures
                        .push(format!("op {index}: id {id} allocated twice"));
                    return;
                }
                match self.heap.try_malloc(size) {
                    Ok(Some(ptr)) => self.adopt(index, id, ptr, size),
                    Ok(None) => *self.slot(id) = Some(Slot { ptr: 0, size: 0 }),
                    Err(err) => self
                        .failures
                        .push(format!("op {index}: malloc({size}) failed: {err}")),
                }
            }
            TraceOp::Free { id } => {
                let Some(slot) = self.slot(id).take() else {
                    self.failures
                        .push(format!("op {index}: free of unallocated id {id}"));
                    return;
                };
                if slot.ptr != 0 {
                    self.verify_prefix(index, id, slot.ptr, slot.size);
                }
                self.forget(slot);
                if let Err(err) = self.heap.try_free(slot.ptr) {
                    self.failures
                        .push(format!("op {index}: free({:#x}) failed: {err}", slot.ptr));
                }
            }
            TraceOp::Realloc { id, size } => {
                let old = self.slot(id).unwrap_or(Slot { ptr: 0, size: 0 });
                if old.ptr != 0 {
                    self.verify_prefix(index, id, old.ptr, old.size);
                }
                match self.heap.try_realloc(old.ptr, size) {
                    Ok(Some(ptr)) => {
                        self.forget(old);
                        self.verify_prefix(index, id, ptr, old.size.min(size));
                        self.adopt(index, id, ptr, size);
                    }
                    Ok(None) => {
                        self.forget(old);
                        *self.slot(id) = None;
                    }
                    Err(err) => self.failures.push(format!(
                        "op {index}: realloc({:#x}, {size}) failed: {err}",
                        old.ptr
                    )),
                }
            }
        }
    }

    /// Slot of trace id `id`, grown on first use.
    fn slot(&mut self, id: usize) -> &mut Option<Slot> {
        if id >= self.slots.len() {
            self.slots.resize(id + 1, None);
        }
        &mut self.slots[id]
    }

    /// Checks a fresh payload and records it as live.
    fn adopt(&mut self, index: usize, id: usize, ptr: usize, size: usize) {
        if ptr % 8 != 0 {
            self.failures
                .push(format!("op {index}: payload {ptr:#x} is not 8-byte aligned"));
        }
        let end = ptr + size;
        match self.heap.usable_size(ptr) {
            Some(usable) if usable >= size && end <= self.heap.heap_size() => {}
            _ => self.failures.push(format!(
                "op {index}: payload {ptr:#x}+{size} does not fit its block"
            )),
        }
        if let Some((&start, &stop)) = self.live.range(..end).next_back()
            && stop > ptr
        {
            self.failures.push(format!(
                "op {index}: payload {ptr:#x}..{end:#x} overlaps live {start:#x}..{stop:#x}"
            ));
        }

        if let Some(payload) = self.heap.payload_mut(ptr) {
            for (offset, byte) in payload.iter_mut().take(size).enumerate() {
                *byte = pattern_byte(id, offset);
            }
        }
        self.live.insert(ptr, end);
        self.live_bytes += size;
        *self.slot(id) = Some(Slot { ptr, size });
    }

    fn forget(&mut self, slot: Slot) {
        if slot.ptr == 0 {
            return;
        }
        self.live.remove(&slot.ptr);
        self.live_bytes -= slot.size;
    }

    fn verify_prefix(&mut self, index: usize, id: usize, ptr: usize, len: usize) {
        let Some(payload) = self.heap.payload(ptr) else {
            self.failures
                .push(format!("op {index}: payload {ptr:#x} is not allocated"));
            return;
        };
        let damaged = payload
            .iter()
            .take(len)
            .enumerate()
            .position(|(offset, byte)| *byte != pattern_byte(id, offset));
        if let Some(offset) = damaged {
            self.failures.push(format!(
                "op {index}: payload {ptr:#x} of id {id} corrupted at byte {offset}"
            ));
        }
    }

    fn collect_logs(&mut self) {
        for record in self.heap.drain_lifecycle_logs() {
            match record.level {
                AllocatorLogLevel::Warn => self.warn_events += 1,
                AllocatorLogLevel::Error => self.error_events += 1,
                _ => continue,
            }
            self.notable.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagalloc_core::SafetyLevel;

    fn trace(text: &str) -> Trace {
        Trace::parse("unit", text).unwrap()
    }

    #[test]
    fn replays_short_trace() {
        let trace = trace("20000\n2\n5\n1\na 0 2040\na 1 2040\nf 1\nr 0 48\nf 0\n");
        let run = TraceRunner::new(HeapConfig::default())
            .with_checks(true)
            .run(&trace)
            .unwrap();
        assert!(run.report.failures.is_empty(), "{:?}", run.report.failures);
        assert_eq!(run.report.peak_live_bytes, 4080);
        assert!(run.report.utilization > 0.0 && run.report.utilization <= 1.0);
        assert!(run.notable.is_empty());
    }

    #[test]
    fn reports_trace_mistakes_without_panicking() {
        let trace = trace("100\n2\n3\n1\nf 1\na 0 8\na 0 8\n");
        let run = TraceRunner::new(HeapConfig::default()).run(&trace).unwrap();
        assert_eq!(run.report.failures.len(), 2);
        assert!(run.report.failures[0].contains("unallocated id 1"));
        assert!(run.report.failures[1].contains("allocated twice"));
    }

    #[test]
    fn out_of_memory_is_a_failure_entry() {
        let trace = trace("100\n1\n1\n1\na 0 100000\n");
        let config = HeapConfig::default()
            .with_max_heap(4096)
            .with_safety(SafetyLevel::Hardened);
        let run = TraceRunner::new(config).run(&trace).unwrap();
        assert_eq!(run.report.failures.len(), 1);
        assert!(run.report.warn_events >= 1);
        assert!(run.notable.iter().any(|record| record.event == "oom"));
    }

    #[test]
    fn declared_id_count_does_not_size_the_replay() {
        let trace = Trace {
            name: "wide".to_string(),
            suggested_heap: 100,
            num_ids: usize::MAX,
            weight: 1,
            ops: vec![
                TraceOp::Alloc { id: 7, size: 24 },
                TraceOp::Free { id: 7 },
            ],
        };
        let run = TraceRunner::new(HeapConfig::default()).run(&trace).unwrap();
        assert!(run.report.passed(), "{:?}", run.report.failures);
    }

    #[test]
    fn zero_sized_ops_are_accepted() {
        let trace = trace("100\n1\n3\n1\na 0 0\nr 0 16\nr 0 0\n");
        let run = TraceRunner::new(HeapConfig::default())
            .with_checks(true)
            .run(&trace)
            .unwrap();
        assert!(run.report.failures.is_empty(), "{:?}", run.report.failures);
    }
}
