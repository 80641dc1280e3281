//! Heap configuration.
//!
//! The validation mode is set via the `TAGALLOC_MODE` environment variable:
//! - `strict` (default): cheap pointer validation on `free`/`realloc`.
//!   Invalid pointers and double frees are rejected and logged; the heap is
//!   left untouched.
//! - `hardened`: strict validation plus a block walk proving membership of
//!   every freed pointer, and a full consistency check after each mutating
//!   call.
//! - `off`: no validation. Benchmark baseline only; bad pointers are out of
//!   contract.
//!
//! `TAGALLOC_CHUNK_SIZE` and `TAGALLOC_MAX_HEAP` override the growth
//! increment and the heap limit.

use crate::error::HeapError;
use crate::malloc::block::{ALIGNMENT, MIN_BLOCK_SIZE, SENTINEL_OVERHEAD};

/// Default growth increment when no free block fits.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Size of the free block created by `init`.
pub const DEFAULT_INITIAL_EXTEND: usize = 64;

/// Default limit of the heap-growth collaborator.
pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

/// Leftovers at least this large stay at the front of a split block.
pub const DEFAULT_BACK_SPLIT_THRESHOLD: usize = 100;

/// Default number of retained lifecycle records.
pub const DEFAULT_LOG_CAPACITY: usize = 4096;

/// Largest heap whose block sizes still fit a boundary tag.
pub const MAX_HEAP_LIMIT: usize = 1 << 31;

/// Pointer validation mode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyLevel {
    /// Cheap validation; reject bad frees without touching the heap.
    #[default]
    Strict,
    /// Strict plus membership walk and post-operation consistency checks.
    Hardened,
    /// No validation.
    Off,
}

impl SafetyLevel {
    /// Parse from string (case-insensitive). Unknown strings are `Strict`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "default" | "abi" => Self::Strict,
            "hardened" | "repair" | "full" => Self::Hardened,
            "off" | "none" | "disabled" => Self::Off,
            _ => Self::Strict,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Hardened => "hardened",
            Self::Off => "off",
        }
    }

    /// True if `free`/`realloc` validate their pointer argument.
    #[must_use]
    pub const fn validation_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// True if every mutating call is followed by a full heap check.
    #[must_use]
    pub const fn checks_after_mutation(self) -> bool {
        matches!(self, Self::Hardened)
    }
}

/// Tunables for one heap instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
    pub safety: SafetyLevel,
    /// Bytes of the first free block created by `init`.
    pub initial_extend: usize,
    /// Minimum growth when no free block fits.
    pub chunk_size: usize,
    /// Upper bound on total heap bytes handed out by the growth collaborator.
    pub max_heap: usize,
    /// Split leftovers of at least this many bytes stay at the front of the
    /// block and the allocation takes the back; smaller leftovers go behind.
    pub back_split_threshold: usize,
    /// Lifecycle records retained before the oldest are dropped. Zero
    /// disables recording.
    pub log_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            safety: SafetyLevel::default(),
            initial_extend: DEFAULT_INITIAL_EXTEND,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_heap: DEFAULT_MAX_HEAP,
            back_split_threshold: DEFAULT_BACK_SPLIT_THRESHOLD,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl HeapConfig {
    /// Defaults overridden by `TAGALLOC_MODE`, `TAGALLOC_CHUNK_SIZE` and
    /// `TAGALLOC_MAX_HEAP`. Malformed numbers are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`HeapConfig::from_env`] with an injectable variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(mode) = lookup("TAGALLOC_MODE") {
            config.safety = SafetyLevel::from_str_loose(&mode);
        }
        if let Some(chunk) = lookup("TAGALLOC_CHUNK_SIZE").and_then(|v| parse_size(&v)) {
            config.chunk_size = chunk;
        }
        if let Some(max) = lookup("TAGALLOC_MAX_HEAP").and_then(|v| parse_size(&v)) {
            config.max_heap = max;
        }
        config
    }

    #[must_use]
    pub fn with_safety(mut self, safety: SafetyLevel) -> Self {
        self.safety = safety;
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_initial_extend(mut self, initial_extend: usize) -> Self {
        self.initial_extend = initial_extend;
        self
    }

    #[must_use]
    pub fn with_max_heap(mut self, max_heap: usize) -> Self {
        self.max_heap = max_heap;
        self
    }

    #[must_use]
    pub fn with_back_split_threshold(mut self, threshold: usize) -> Self {
        self.back_split_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_log_capacity(mut self, log_capacity: usize) -> Self {
        self.log_capacity = log_capacity;
        self
    }

    /// Rejects sizes the block format cannot represent.
    pub fn validate(&self) -> Result<(), HeapError> {
        if self.chunk_size == 0 || self.chunk_size % ALIGNMENT != 0 {
            return Err(HeapError::InvalidConfig(format!(
                "chunk_size {} must be a non-zero multiple of {ALIGNMENT}",
                self.chunk_size
            )));
        }
        if self.initial_extend < MIN_BLOCK_SIZE || self.initial_extend % ALIGNMENT != 0 {
            return Err(HeapError::InvalidConfig(format!(
                "initial_extend {} must be a multiple of {ALIGNMENT} and at least {MIN_BLOCK_SIZE}",
                self.initial_extend
            )));
        }
        if self.max_heap > MAX_HEAP_LIMIT {
            return Err(HeapError::InvalidConfig(format!(
                "max_heap {} exceeds {MAX_HEAP_LIMIT}",
                self.max_heap
            )));
        }
        if self.max_heap < SENTINEL_OVERHEAD + self.initial_extend {
            return Err(HeapError::InvalidConfig(format!(
                "max_heap {} cannot hold the sentinels and the initial block",
                self.max_heap
            )));
        }
        Ok(())
    }
}

/// Accepts plain decimal, `0x` hex, and `k`/`m` suffixed sizes.
fn parse_size(raw: &str) -> Option<usize> {
    let raw = raw.trim().to_ascii_lowercase();
    let (digits, scale) = if let Some(rest) = raw.strip_suffix('k') {
        (rest, 1 << 10)
    } else if let Some(rest) = raw.strip_suffix('m') {
        (rest, 1 << 20)
    } else {
        (raw.as_str(), 1)
    };
    let value = match digits.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<usize>().ok()?,
    };
    value.checked_mul(scale)
}
