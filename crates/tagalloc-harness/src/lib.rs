//! Trace-driven test harness for the tagalloc heap.
//!
//! This crate provides:
//! - Trace files: parse and render the classic allocator-lab trace format
//! - Replay: drive a fresh heap through a trace and verify every payload
//! - Generation: deterministic synthetic workloads
//! - Scenarios: fixed call sequences exercising reuse, coalescing and resize
//! - Reports and structured JSONL logs for CI

#![forbid(unsafe_code)]

pub mod generate;
pub mod report;
pub mod runner;
pub mod scenarios;
pub mod structured_log;
pub mod trace;

pub use generate::{Pattern, generate};
pub use report::{RunSummary, TraceReport};
pub use runner::{TraceRun, TraceRunner};
pub use scenarios::{ScenarioResult, run_scenarios};
pub use trace::{Trace, TraceError, TraceOp};
