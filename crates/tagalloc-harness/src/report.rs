//! Replay reports.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Outcome of replaying one trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceReport {
    pub name: String,
    /// SHA-256 of the trace in canonical text form.
    pub sha256: String,
    pub mode: String,
    pub ops: usize,
    pub grow_calls: usize,
    /// Final heap size in bytes, sentinels included.
    pub heap_size: usize,
    /// Largest sum of requested bytes live at once.
    pub peak_live_bytes: usize,
    /// `peak_live_bytes / heap_size`.
    pub utilization: f64,
    pub warn_events: usize,
    pub error_events: usize,
    pub failures: Vec<String>,
}

impl TraceReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reports of one replay run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub title: String,
    pub mode: String,
    pub timestamp: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Mean utilization over the traces that passed.
    pub mean_utilization: f64,
    pub traces: Vec<TraceReport>,
}

impl RunSummary {
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        mode: impl Into<String>,
        timestamp: impl Into<String>,
        traces: Vec<TraceReport>,
    ) -> Self {
        let passed: Vec<&TraceReport> = traces.iter().filter(|report| report.passed()).collect();
        let mean_utilization = if passed.is_empty() {
            0.0
        } else {
            passed.iter().map(|report| report.utilization).sum::<f64>() / passed.len() as f64
        };
        Self {
            title: title.into(),
            mode: mode.into(),
            timestamp: timestamp.into(),
            total: traces.len(),
            passed: passed.len(),
            failed: traces.len() - passed.len(),
            mean_utilization,
            traces,
        }
    }

    /// Render the summary as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}\n", self.title);
        let _ = writeln!(out, "- Mode: {}", self.mode);
        let _ = writeln!(out, "- Timestamp: {}", self.timestamp);
        let _ = writeln!(out, "- Total: {}", self.total);
        let _ = writeln!(out, "- Passed: {}", self.passed);
        let _ = writeln!(out, "- Failed: {}", self.failed);
        let _ = writeln!(
            out,
            "- Mean utilization: {:.1}%\n",
            self.mean_utilization * 100.0
        );

        out.push_str("| Trace | Ops | Heap | Util | Grows | Warn | Status |\n");
        out.push_str("|-------|-----|------|------|-------|------|--------|\n");
        for report in &self.traces {
            let status = if report.passed() { "PASS" } else { "FAIL" };
            let _ = writeln!(
                out,
                "| {} | {} | {} | {:.1}% | {} | {} | {} |",
                report.name,
                report.ops,
                report.heap_size,
                report.utilization * 100.0,
                report.grow_calls,
                report.warn_events,
                status
            );
        }

        for report in self.traces.iter().filter(|report| !report.passed()) {
            let _ = writeln!(out, "\n## {}\n", report.name);
            for failure in &report.failures {
                let _ = writeln!(out, "- {failure}");
            }
        }
        out
    }

    /// Render the summary as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::Digest;
    hex_lower(&sha2::Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, utilization: f64, failures: Vec<String>) -> TraceReport {
        TraceReport {
            name: name.to_string(),
            sha256: sha256_hex(name.as_bytes()),
            mode: "strict".to_string(),
            ops: 10,
            grow_calls: 2,
            heap_size: 4176,
            peak_live_bytes: 2000,
            utilization,
            warn_events: 0,
            error_events: 0,
            failures,
        }
    }

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn summary_counts_and_mean_skip_failures() {
        let summary = RunSummary::new(
            "replay",
            "strict",
            "2026-01-01T00:00:00.000Z",
            vec![
                report("a", 0.5, vec![]),
                report("b", 0.7, vec![]),
                report("c", 0.1, vec!["op 3: boom".to_string()]),
            ],
        );
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert!((summary.mean_utilization - 0.6).abs() < 1e-9);
    }

    #[test]
    fn markdown_lists_failures() {
        let summary = RunSummary::new(
            "replay",
            "hardened",
            "t",
            vec![report("bad", 0.2, vec!["op 1: overlap".to_string()])],
        );
        let md = summary.to_markdown();
        assert!(md.starts_with("# replay\n"));
        assert!(md.contains("| bad | 10 | 4176 | 20.0% | 2 | 0 | FAIL |"));
        assert!(md.contains("## bad"));
        assert!(md.contains("- op 1: overlap"));
    }

    #[test]
    fn json_parses_back() {
        let summary = RunSummary::new("replay", "strict", "t", vec![report("a", 0.5, vec![])]);
        let parsed: RunSummary = serde_json::from_str(&summary.to_json()).unwrap();
        assert_eq!(parsed, summary);
    }
}
