#![no_main]
use libfuzzer_sys::fuzz_target;
use tagalloc_core::{Heap, HeapConfig, SafetyLevel};

fuzz_target!(|data: &[u8]| {
    // Each 4-byte chunk is one op: kind, size (u16 LE), slot selector.
    if data.len() < 4 {
        return;
    }

    let safety = match data[0] % 3 {
        0 => SafetyLevel::Strict,
        1 => SafetyLevel::Hardened,
        _ => SafetyLevel::Off,
    };
    let config = HeapConfig::default()
        .with_safety(safety)
        .with_max_heap(1 << 20)
        .with_log_capacity(64);
    let Ok(mut heap) = Heap::new(config) else {
        return;
    };
    let mut live: Vec<(usize, usize, u8)> = Vec::new();

    for chunk in data[1..].chunks_exact(4) {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize;
        let pick = chunk[3] as usize;
        let fill = chunk[3];

        match chunk[0] % 5 {
            0 => {
                if let Some(ptr) = heap.malloc(size) {
                    if let Some(bytes) = heap.payload_mut(ptr) {
                        bytes[..size].fill(fill);
                    }
                    live.push((ptr, size, fill));
                }
            }
            1 => {
                if let Some(ptr) = heap.calloc(size % 256, chunk[3] as usize % 64) {
                    let len = (size % 256) * (chunk[3] as usize % 64);
                    let bytes = heap.payload(ptr).expect("calloc payload");
                    assert!(bytes[..len].iter().all(|b| *b == 0));
                    heap.free(ptr);
                }
            }
            2 if !live.is_empty() => {
                let (ptr, len, byte) = live.swap_remove(pick % live.len());
                let bytes = heap.payload(ptr).expect("live payload");
                assert!(bytes[..len].iter().all(|b| *b == byte));
                heap.free(ptr);
            }
            3 if !live.is_empty() => {
                let slot = pick % live.len();
                let (ptr, len, byte) = live[slot];
                match heap.realloc(ptr, size) {
                    Some(moved) => {
                        let kept = len.min(size);
                        let bytes = heap.payload(moved).expect("resized payload");
                        assert!(bytes[..kept].iter().all(|b| *b == byte));
                        if let Some(bytes) = heap.payload_mut(moved) {
                            bytes[..size].fill(byte);
                        }
                        live[slot] = (moved, size, byte);
                    }
                    None if size == 0 => {
                        live.swap_remove(slot);
                    }
                    None => {}
                }
            }
            4 if safety != SafetyLevel::Off => {
                // Arbitrary offsets must be rejected without touching the heap.
                let before = heap.stats();
                let bogus = size * 8;
                if heap.usable_size(bogus).is_none() {
                    heap.free(bogus);
                    assert_eq!(heap.stats(), before);
                }
            }
            _ => {}
        }

        heap.check_heap().expect("heap invariants hold after every op");
    }

    for (ptr, _, _) in live {
        heap.free(ptr);
    }
    let stats = heap.check_heap().expect("heap invariants hold after cleanup");
    assert_eq!(stats.allocated_blocks, 0);
});
