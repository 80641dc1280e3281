//! Built-in allocator scenarios.
//!
//! Each scenario drives a fresh heap through a fixed call sequence and
//! checks a property that must hold between calls.

use serde::{Deserialize, Serialize};
use tagalloc_core::malloc::block::{OVERHEAD, block_of};
use tagalloc_core::{Heap, HeapConfig, HeapError, SafetyLevel};

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

type Scenario = fn(SafetyLevel) -> Result<String, String>;

const SCENARIOS: &[(&str, Scenario)] = &[
    ("reuse_then_coalesce", reuse_then_coalesce),
    ("small_alloc_loop", small_alloc_loop),
    ("shrink_regrow_in_place", shrink_regrow_in_place),
    ("shrink_regrow_relocated", shrink_regrow_relocated),
    ("resize_identity", resize_identity),
    ("zero_and_null", zero_and_null),
    ("alloc_free_restores", alloc_free_restores),
    ("double_free_rejected", double_free_rejected),
];

/// Runs every scenario under `mode`.
#[must_use]
pub fn run_scenarios(mode: SafetyLevel) -> Vec<ScenarioResult> {
    SCENARIOS
        .iter()
        .map(|(name, scenario)| {
            let (passed, detail) = match scenario(mode) {
                Ok(detail) => (true, detail),
                Err(detail) => (false, detail),
            };
            ScenarioResult {
                name: (*name).to_string(),
                passed,
                detail,
            }
        })
        .collect()
}

fn heap(mode: SafetyLevel) -> Result<Heap, String> {
    Heap::new(HeapConfig::default().with_safety(mode)).map_err(|e| e.to_string())
}

fn checked(heap: &Heap, step: &str) -> Result<(), String> {
    heap.check_heap()
        .map(|_| ())
        .map_err(|e| format!("{step}: {e}"))
}

fn alloc(heap: &mut Heap, size: usize) -> Result<usize, String> {
    heap.malloc(size)
        .ok_or_else(|| format!("malloc({size}) returned null"))
}

fn block_end(heap: &Heap, ptr: usize) -> Result<usize, String> {
    let usable = heap
        .usable_size(ptr)
        .ok_or_else(|| format!("{ptr:#x} is not allocated"))?;
    Ok(block_of(ptr) + usable + OVERHEAD)
}

fn reuse_then_coalesce(mode: SafetyLevel) -> Result<String, String> {
    let mut heap = heap(mode)?;
    let a = alloc(&mut heap, 100)?;
    let b = alloc(&mut heap, 100)?;
    let start = block_of(a).min(block_of(b));
    let end = block_end(&heap, a)?.max(block_end(&heap, b)?);
    let (a_start, a_end) = (block_of(a), block_end(&heap, a)?);
    let grows = heap.grow_calls();

    heap.free(a);
    let c = alloc(&mut heap, 50)?;
    if heap.grow_calls() != grows {
        return Err("malloc(50) grew the heap instead of reusing a".into());
    }
    if !(a_start..a_end).contains(&block_of(c)) {
        return Err(format!(
            "c={c:#x} is outside a's freed block {a_start:#x}..{a_end:#x}"
        ));
    }
    checked(&heap, "after reuse")?;

    heap.free(b);
    heap.free(c);
    checked(&heap, "after frees")?;
    let spanning = heap
        .blocks()
        .find(|info| !info.allocated && info.offset <= start && info.offset + info.size >= end);
    match spanning {
        Some(info) => Ok(format!(
            "c reused a at {c:#x}; merged block {:#x}+{}",
            info.offset, info.size
        )),
        None => Err(format!("no free block spans {start:#x}..{end:#x}")),
    }
}

fn small_alloc_loop(mode: SafetyLevel) -> Result<String, String> {
    let mut heap = heap(mode)?;
    let target = heap.grow_calls() + 2;
    let mut rounds = 0usize;
    while heap.grow_calls() < target {
        alloc(&mut heap, 16)?;
        rounds += 1;
        let adjacent = heap
            .blocks()
            .collect::<Vec<_>>()
            .windows(2)
            .any(|pair| !pair[0].allocated && !pair[1].allocated);
        if adjacent {
            return Err(format!("adjacent free blocks after round {rounds}"));
        }
        if rounds > 100_000 {
            return Err("heap never grew twice".into());
        }
    }
    checked(&heap, "after loop")?;
    Ok(format!("{rounds} allocations, {} grows", heap.grow_calls()))
}

const LEADING: [u8; 10] = [3, 1, 4, 1, 5, 9, 2, 6, 5, 3];

fn leading_intact(heap: &Heap, ptr: usize, step: &str) -> Result<(), String> {
    match heap.payload(ptr) {
        Some(bytes) if bytes.starts_with(&LEADING) => Ok(()),
        Some(_) => Err(format!("{step}: leading bytes changed")),
        None => Err(format!("{step}: {ptr:#x} is not allocated")),
    }
}

fn shrink_then_regrow(mode: SafetyLevel, squat: bool) -> Result<(usize, usize), String> {
    let mut heap = heap(mode)?;
    let p = alloc(&mut heap, 200)?;
    heap.payload_mut(p)
        .ok_or("fresh payload unavailable")?
        .get_mut(..LEADING.len())
        .ok_or("payload shorter than 10 bytes")?
        .copy_from_slice(&LEADING);

    let shrunk = heap.realloc(p, 10).ok_or("realloc(p, 10) returned null")?;
    leading_intact(&heap, shrunk, "after shrink")?;
    if squat {
        alloc(&mut heap, 100)?;
    }
    let regrown = heap
        .realloc(shrunk, 200)
        .ok_or("realloc(p, 200) returned null")?;
    leading_intact(&heap, regrown, "after regrow")?;
    checked(&heap, "after regrow")?;
    Ok((p, regrown))
}

fn shrink_regrow_in_place(mode: SafetyLevel) -> Result<String, String> {
    let (p, regrown) = shrink_then_regrow(mode, false)?;
    if regrown == p {
        Ok(format!("regrown in place at {p:#x}"))
    } else {
        Err(format!("moved {p:#x} -> {regrown:#x} with an untouched tail"))
    }
}

fn shrink_regrow_relocated(mode: SafetyLevel) -> Result<String, String> {
    let (p, regrown) = shrink_then_regrow(mode, true)?;
    Ok(format!("{p:#x} -> {regrown:#x}, leading bytes intact"))
}

fn resize_identity(mode: SafetyLevel) -> Result<String, String> {
    let mut heap = heap(mode)?;
    for size in [1, 24, 100, 1000, 5000] {
        let ptr = alloc(&mut heap, size)?;
        let usable = heap.usable_size(ptr).unwrap_or(0);
        let before = heap.stats();
        if heap.realloc(ptr, usable) != Some(ptr) || heap.stats() != before {
            return Err(format!("realloc to usable size {usable} was not a no-op"));
        }
    }
    checked(&heap, "after resizes")?;
    Ok("realloc(p, usable_size(p)) returned p".into())
}

fn zero_and_null(mode: SafetyLevel) -> Result<String, String> {
    let mut heap = heap(mode)?;
    alloc(&mut heap, 40)?;
    let before = heap.stats();
    if heap.malloc(0).is_some() {
        return Err("malloc(0) returned a block".into());
    }
    heap.free(0);
    if heap.stats() != before {
        return Err("state changed".into());
    }
    Ok("malloc(0) and free(null) left the heap untouched".into())
}

fn alloc_free_restores(mode: SafetyLevel) -> Result<String, String> {
    let mut heap = heap(mode)?;
    let held: Vec<usize> = (0..32)
        .map(|i| alloc(&mut heap, 16 + (i * 53) % 400))
        .collect::<Result<_, _>>()?;
    for ptr in held.iter().step_by(2) {
        heap.free(*ptr);
    }
    for size in [1, 17, 100, 640, 4000] {
        let before = heap.stats();
        let ptr = alloc(&mut heap, size)?;
        let grown = heap.heap_size() - before.heap_size;
        heap.free(ptr);
        let after = heap.stats();
        let restored = if grown == 0 {
            after.free_bytes == before.free_bytes
                && after.bucket_occupancy == before.bucket_occupancy
        } else {
            after.free_bytes == before.free_bytes + grown
        };
        if !restored {
            return Err(format!("malloc({size}) then free did not restore free space"));
        }
    }
    checked(&heap, "after cycles")?;
    Ok("free space restored after each cycle".into())
}

fn double_free_rejected(mode: SafetyLevel) -> Result<String, String> {
    if mode == SafetyLevel::Off {
        return Ok("skipped: validation disabled".into());
    }
    let mut heap = heap(mode)?;
    let p = alloc(&mut heap, 64)?;
    let _guard = alloc(&mut heap, 64)?;
    heap.free(p);
    let before = heap.stats();
    match heap.try_free(p) {
        Err(HeapError::DoubleFree { .. }) if heap.stats() == before => {
            checked(&heap, "after double free")?;
            Ok("second free rejected".into())
        }
        Err(HeapError::DoubleFree { .. }) => Err("rejected free still changed the heap".into()),
        other => Err(format!("second free returned {other:?}")),
    }
}
