//! CLI entrypoint for the tagalloc trace harness.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tagalloc_core::{HeapConfig, SafetyLevel};
use tagalloc_harness::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome, now_utc};
use tagalloc_harness::{Pattern, RunSummary, Trace, TraceRunner, generate, run_scenarios};

/// Trace tooling for the tagalloc heap.
#[derive(Debug, Parser)]
#[command(name = "tagalloc-harness")]
#[command(about = "Trace replay and scenario harness for the tagalloc heap")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay trace files against fresh heaps.
    Replay {
        /// Trace file(s) to replay.
        #[arg(long = "trace", required = true)]
        traces: Vec<PathBuf>,
        /// Safety level (`strict`, `hardened` or `off`). Defaults to TAGALLOC_MODE.
        #[arg(long)]
        mode: Option<String>,
        /// Run the full heap check after every operation.
        #[arg(long)]
        check: bool,
        /// Output JSON summary path.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Output markdown summary path.
        #[arg(long)]
        markdown: Option<PathBuf>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Write a synthetic trace.
    Generate {
        /// Workload pattern.
        #[arg(long)]
        pattern: Pattern,
        /// Generator seed (decimal or 0x...).
        #[arg(long, default_value = "0xDEAD_BEEF")]
        seed: String,
        /// Approximate number of operations.
        #[arg(long, default_value_t = 2000)]
        ops: usize,
        /// Output trace path.
        #[arg(long)]
        output: PathBuf,
    },
    /// Run the built-in allocator scenarios.
    Scenarios {
        /// Safety level to run them under.
        #[arg(long, default_value = "strict")]
        mode: String,
    },
}

fn parse_seed(raw: &str) -> Result<u64, String> {
    let cleaned = raw.trim().replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid seed `{raw}`: {e}"))
}

fn write_output(path: &Path, body: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)
}

fn replay(
    traces: &[PathBuf],
    mode: Option<&str>,
    check: bool,
    report: Option<&Path>,
    markdown: Option<&Path>,
    log: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = HeapConfig::from_env();
    if let Some(mode) = mode {
        config = config.with_safety(SafetyLevel::from_str_loose(mode));
    }
    let mode_name = config.safety.as_str();
    let runner = TraceRunner::new(config.clone()).with_checks(check);
    let mut emitter = log
        .map(|path| LogEmitter::to_file(path, "replay"))
        .transpose()?;

    let mut reports = Vec::with_capacity(traces.len());
    for path in traces {
        let trace = Trace::from_file(path)?;
        eprintln!("Replaying {} ({} ops)", trace.name, trace.ops.len());
        let started = std::time::Instant::now();
        let run = runner.run(&trace)?;

        if let Some(emitter) = emitter.as_mut() {
            for record in &run.notable {
                emitter.emit_entry(
                    LogEntry::from_lifecycle(record)
                        .with_mode(mode_name)
                        .with_subject(trace.name.as_str()),
                )?;
            }
            let outcome = if run.report.passed() {
                Outcome::Pass
            } else {
                Outcome::Fail
            };
            let level = if run.report.passed() {
                LogLevel::Info
            } else {
                LogLevel::Error
            };
            emitter.emit_entry(
                LogEntry::new("", level, "trace_replayed")
                    .with_mode(mode_name)
                    .with_subject(trace.name.as_str())
                    .with_outcome(outcome)
                    .with_duration_ms(started.elapsed().as_millis() as u64)
                    .with_details(serde_json::json!({
                        "sha256": run.report.sha256,
                        "utilization": run.report.utilization,
                        "grow_calls": run.report.grow_calls,
                        "failures": run.report.failures,
                    })),
            )?;
        }
        reports.push(run.report);
    }
    if let Some(emitter) = emitter.as_mut() {
        emitter.flush()?;
    }

    let summary = RunSummary::new("tagalloc trace replay", mode_name, now_utc(), reports);
    if let Some(path) = report {
        write_output(path, &summary.to_json())?;
        eprintln!("Wrote JSON report to {}", path.display());
    }
    if let Some(path) = markdown {
        write_output(path, &summary.to_markdown())?;
        eprintln!("Wrote markdown report to {}", path.display());
    }
    if report.is_none() && markdown.is_none() {
        print!("{}", summary.to_markdown());
    }

    eprintln!(
        "{}/{} traces passed, mean utilization {:.1}%",
        summary.passed,
        summary.total,
        summary.mean_utilization * 100.0
    );
    if summary.failed > 0 {
        return Err(format!("{} trace(s) failed", summary.failed).into());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            traces,
            mode,
            check,
            report,
            markdown,
            log,
        } => replay(
            &traces,
            mode.as_deref(),
            check,
            report.as_deref(),
            markdown.as_deref(),
            log.as_deref(),
        )?,
        Command::Generate {
            pattern,
            seed,
            ops,
            output,
        } => {
            let seed = parse_seed(&seed)?;
            let trace = generate(pattern, seed, ops);
            write_output(&output, &trace.to_text())?;
            eprintln!(
                "Wrote {} ({} ops, {} ids) to {}",
                trace.name,
                trace.ops.len(),
                trace.num_ids,
                output.display()
            );
        }
        Command::Scenarios { mode } => {
            let mode = SafetyLevel::from_str_loose(&mode);
            let results = run_scenarios(mode);
            let failed = results.iter().filter(|result| !result.passed).count();
            for result in &results {
                let status = if result.passed { "PASS" } else { "FAIL" };
                println!("{status} {:<28} {}", result.name, result.detail);
            }
            println!(
                "{}/{} scenarios passed ({})",
                results.len() - failed,
                results.len(),
                mode.as_str()
            );
            if failed > 0 {
                return Err(format!("{failed} scenario(s) failed").into());
            }
        }
    }

    Ok(())
}
