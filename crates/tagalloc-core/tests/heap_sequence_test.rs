//! Deterministic pseudo-random operation sequences with a full heap check
//! after every step.

use tagalloc_core::malloc::block::SENTINEL_OVERHEAD;
use tagalloc_core::{Heap, HeapConfig, HeapError, SafetyLevel};

struct XorShift64(u64);

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct Live {
    ptr: usize,
    len: usize,
    tag: u8,
}

fn fill(heap: &mut Heap, live: Live) {
    let payload = heap.payload_mut(live.ptr).unwrap();
    for (i, byte) in payload[..live.len].iter_mut().enumerate() {
        *byte = live.tag.wrapping_add(i as u8);
    }
}

fn verify(heap: &Heap, live: Live, len: usize) {
    let payload = heap.payload(live.ptr).unwrap();
    for (i, byte) in payload[..len].iter().enumerate() {
        assert_eq!(
            *byte,
            live.tag.wrapping_add(i as u8),
            "payload at {:#x} corrupted at byte {i}",
            live.ptr
        );
    }
}

fn assert_disjoint(heap: &Heap, live: &[Live]) {
    let mut spans: Vec<(usize, usize)> = live
        .iter()
        .map(|entry| (entry.ptr, entry.ptr + heap.usable_size(entry.ptr).unwrap()))
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlapping payloads {pair:?}");
    }
}

fn random_size(rng: &mut XorShift64) -> usize {
    match rng.below(10) {
        0..=5 => 1 + rng.below(64),
        6..=8 => 64 + rng.below(1024),
        _ => 1024 + rng.below(16 * 1024),
    }
}

fn run_sequence(seed: u64, steps: usize, safety: SafetyLevel) {
    let mut heap = Heap::new(HeapConfig::default().with_safety(safety)).unwrap();
    let mut rng = XorShift64::new(seed);
    let mut live: Vec<Live> = Vec::new();

    for step in 0..steps {
        match rng.below(10) {
            0..=3 => {
                let len = random_size(&mut rng);
                let ptr = heap.malloc(len).unwrap();
                assert_eq!(ptr % 8, 0);
                let entry = Live {
                    ptr,
                    len,
                    tag: rng.next_u64() as u8,
                };
                fill(&mut heap, entry);
                live.push(entry);
            }
            4..=6 if !live.is_empty() => {
                let entry = live.swap_remove(rng.below(live.len()));
                verify(&heap, entry, entry.len);
                heap.free(entry.ptr);
            }
            7..=8 if !live.is_empty() => {
                let slot = rng.below(live.len());
                let entry = live[slot];
                let new_len = random_size(&mut rng);
                let ptr = heap.realloc(entry.ptr, new_len).unwrap();
                let moved = Live { ptr, ..entry };
                verify(&heap, moved, entry.len.min(new_len));
                let resized = Live {
                    ptr,
                    len: new_len,
                    tag: entry.tag,
                };
                fill(&mut heap, resized);
                live[slot] = resized;
            }
            9 => {
                let count = 1 + rng.below(16);
                let size = 1 + rng.below(64);
                let ptr = heap.calloc(count, size).unwrap();
                assert!(heap.payload(ptr).unwrap().iter().all(|&b| b == 0));
                let entry = Live {
                    ptr,
                    len: count * size,
                    tag: rng.next_u64() as u8,
                };
                fill(&mut heap, entry);
                live.push(entry);
            }
            _ => {}
        }

        let stats = heap
            .check_heap()
            .unwrap_or_else(|err| panic!("seed {seed} step {step}: {err}"));
        assert_eq!(stats.active_count, live.len());
        assert_eq!(stats.allocated_blocks, live.len());
        assert_eq!(
            stats.free_bytes + stats.allocated_bytes + SENTINEL_OVERHEAD,
            stats.heap_size
        );
        if step % 64 == 0 {
            assert_disjoint(&heap, &live);
        }
    }

    for entry in live.drain(..) {
        verify(&heap, entry, entry.len);
        heap.free(entry.ptr);
    }
    let stats = heap.check_heap().unwrap();
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.allocated_blocks, 0);
}

#[test]
fn strict_sequences_keep_heap_consistent() {
    for seed in [1, 0xDEAD_BEEF, 0x1234_5678_9ABC_DEF0, 42] {
        run_sequence(seed, 2_000, SafetyLevel::Strict);
    }
}

#[test]
fn hardened_sequences_keep_heap_consistent() {
    for seed in [7, 0xFEED_FACE] {
        run_sequence(seed, 600, SafetyLevel::Hardened);
    }
}

#[test]
fn unchecked_sequences_keep_heap_consistent() {
    run_sequence(99, 1_000, SafetyLevel::Off);
}

#[test]
fn rejected_frees_leave_sequence_intact() {
    let config = HeapConfig::default().with_safety(SafetyLevel::Hardened);
    let mut heap = Heap::new(config).unwrap();
    let mut rng = XorShift64::new(0xA11C);
    let mut freed = Vec::new();
    let mut live = Vec::new();
    for _ in 0..300 {
        let ptr = heap.malloc(random_size(&mut rng)).unwrap();
        if rng.below(2) == 0 {
            heap.free(ptr);
            freed.push(ptr);
        } else {
            live.push(ptr);
        }
    }
    let before = heap.check_heap().unwrap();
    for ptr in &freed {
        // A freed slot may have been handed out again.
        if live.contains(ptr) {
            continue;
        }
        match heap.try_free(*ptr) {
            Err(HeapError::DoubleFree { .. } | HeapError::InvalidPointer { .. }) => {}
            other => panic!("free of released {ptr:#x} returned {other:?}"),
        }
    }
    assert_eq!(heap.check_heap().unwrap(), before);
}
