//! Deterministic synthetic trace generation.
//!
//! Every pattern ends with all ids freed, so a correct allocator finishes
//! each generated trace with a single free block.

use std::fmt;
use std::str::FromStr;

use crate::trace::{Trace, TraceOp};

/// Workload shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Random mix of allocations, frees and resizes over a bounded id pool.
    RandomChurn,
    /// A few buffers resized upward step by step, with small allocations in
    /// between pinning the space behind them.
    ReallocLadder,
    /// Alternating small and large allocations; the large ones are freed and
    /// slightly larger ones requested, stressing the small fragments left.
    BinaryFragmentation,
    /// Rounds of many allocations freed in random order followed by one
    /// request as large as all of them together.
    CoalesceStorm,
}

impl Pattern {
    pub const ALL: [Self; 4] = [
        Self::RandomChurn,
        Self::ReallocLadder,
        Self::BinaryFragmentation,
        Self::CoalesceStorm,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RandomChurn => "random-churn",
            Self::ReallocLadder => "realloc-ladder",
            Self::BinaryFragmentation => "binary-fragmentation",
            Self::CoalesceStorm => "coalesce-storm",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|pattern| pattern.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|p| p.as_str()).collect();
                format!("unknown pattern `{s}`, expected one of {}", known.join(", "))
            })
    }
}

/// Xorshift64 generator.
#[derive(Debug, Clone)]
pub struct XorShift64(u64);

impl XorShift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed })
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform-ish value in `0..bound`.
    pub fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound.max(1) as u64) as usize
    }

    /// Uniform-ish value in `low..=high`.
    pub fn between(&mut self, low: usize, high: usize) -> usize {
        low + self.below(high - low + 1)
    }
}

/// Builds a trace of roughly `ops` operations.
#[must_use]
pub fn generate(pattern: Pattern, seed: u64, ops: usize) -> Trace {
    let mut rng = XorShift64::new(seed);
    let ops = ops.max(8);
    let (num_ids, ops) = match pattern {
        Pattern::RandomChurn => random_churn(&mut rng, ops),
        Pattern::ReallocLadder => realloc_ladder(&mut rng, ops),
        Pattern::BinaryFragmentation => binary_fragmentation(&mut rng, ops),
        Pattern::CoalesceStorm => coalesce_storm(&mut rng, ops),
    };
    let suggested_heap = suggested_heap(&ops);
    Trace {
        name: format!("{pattern}-{seed:x}"),
        suggested_heap,
        num_ids,
        weight: 1,
        ops,
    }
}

/// Peak of live requested bytes, rounded up to a page.
fn suggested_heap(ops: &[TraceOp]) -> usize {
    let mut sizes = std::collections::HashMap::new();
    let (mut live, mut peak) = (0usize, 0usize);
    for op in ops {
        match *op {
            TraceOp::Alloc { id, size } | TraceOp::Realloc { id, size } => {
                live -= sizes.insert(id, size).unwrap_or(0);
                live += size;
            }
            TraceOp::Free { id } => live -= sizes.remove(&id).unwrap_or(0),
        }
        peak = peak.max(live);
    }
    peak.div_ceil(4096) * 4096
}

fn free_all(live: &mut Vec<usize>, out: &mut Vec<TraceOp>) {
    for id in live.drain(..) {
        out.push(TraceOp::Free { id });
    }
}

fn random_churn(rng: &mut XorShift64, ops: usize) -> (usize, Vec<TraceOp>) {
    let num_ids = (ops / 4).clamp(4, 512);
    let mut free_ids: Vec<usize> = (0..num_ids).rev().collect();
    let mut live: Vec<usize> = Vec::new();
    let mut out = Vec::with_capacity(ops + num_ids);
    let size = |rng: &mut XorShift64| match rng.below(10) {
        0..=5 => rng.between(1, 128),
        6..=8 => rng.between(129, 2048),
        _ => rng.between(2049, 32 * 1024),
    };

    while out.len() + live.len() < ops {
        let roll = rng.below(10);
        if (roll < 5 || live.is_empty())
            && let Some(id) = free_ids.pop()
        {
            out.push(TraceOp::Alloc {
                id,
                size: size(rng),
            });
            live.push(id);
        } else if roll < 8 {
            let id = live.swap_remove(rng.below(live.len()));
            out.push(TraceOp::Free { id });
            free_ids.push(id);
        } else {
            let id = live[rng.below(live.len())];
            out.push(TraceOp::Realloc {
                id,
                size: size(rng),
            });
        }
    }
    free_all(&mut live, &mut out);
    (num_ids, out)
}

fn realloc_ladder(rng: &mut XorShift64, ops: usize) -> (usize, Vec<TraceOp>) {
    let ladders = 4;
    let steps = (ops / (ladders * 2)).max(1);
    let num_ids = ladders * (steps + 1);
    let mut out = Vec::with_capacity(ops + num_ids);
    let mut pins = Vec::new();
    let mut next_pin = ladders;

    for id in 0..ladders {
        out.push(TraceOp::Alloc {
            id,
            size: rng.between(64, 512),
        });
    }
    let mut sizes = vec![512usize; ladders];
    for _ in 0..steps {
        for (id, size) in sizes.iter_mut().enumerate() {
            *size += rng.between(16, 640);
            out.push(TraceOp::Realloc { id, size: *size });
        }
        let pin = next_pin;
        next_pin += 1;
        out.push(TraceOp::Alloc {
            id: pin,
            size: rng.between(8, 64),
        });
        pins.push(pin);
    }
    let mut live: Vec<usize> = (0..ladders).collect();
    live.extend(pins);
    free_all(&mut live, &mut out);
    (num_ids, out)
}

fn binary_fragmentation(rng: &mut XorShift64, ops: usize) -> (usize, Vec<TraceOp>) {
    let pairs = (ops / 5).max(1);
    let num_ids = pairs * 3;
    let mut out = Vec::with_capacity(pairs * 5);
    let small = rng.between(8, 64);
    let large = rng.between(256, 512);

    for pair in 0..pairs {
        out.push(TraceOp::Alloc {
            id: 2 * pair,
            size: small,
        });
        out.push(TraceOp::Alloc {
            id: 2 * pair + 1,
            size: large,
        });
    }
    for pair in 0..pairs {
        out.push(TraceOp::Free { id: 2 * pair + 1 });
    }
    for pair in 0..pairs {
        out.push(TraceOp::Alloc {
            id: 2 * pairs + pair,
            size: large + small + 16,
        });
    }
    for id in (0..pairs).map(|pair| 2 * pair).chain(2 * pairs..3 * pairs) {
        out.push(TraceOp::Free { id });
    }
    (num_ids, out)
}

fn coalesce_storm(rng: &mut XorShift64, ops: usize) -> (usize, Vec<TraceOp>) {
    let per_round = 32;
    let rounds = (ops / (2 * per_round + 2)).max(1);
    let num_ids = per_round + 1;
    let mut out = Vec::with_capacity(rounds * (2 * per_round + 2));

    for _ in 0..rounds {
        let mut total = 0;
        for id in 0..per_round {
            let size = rng.between(16, 256);
            total += size;
            out.push(TraceOp::Alloc { id, size });
        }
        let mut order: Vec<usize> = (0..per_round).collect();
        for i in (1..order.len()).rev() {
            order.swap(i, rng.below(i + 1));
        }
        for id in order {
            out.push(TraceOp::Free { id });
        }
        out.push(TraceOp::Alloc {
            id: per_round,
            size: total,
        });
        out.push(TraceOp::Free { id: per_round });
    }
    (num_ids, out)
}
