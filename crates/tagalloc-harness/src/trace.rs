//! Allocation trace files.
//!
//! A trace starts with four header lines (suggested heap size, number of
//! ids, number of ops, weight) followed by one operation per line:
//!
//! ```text
//! a <id> <bytes>    allocate
//! f <id>            free
//! r <id> <bytes>    resize
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use std::fmt::Write as _;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: missing header field `{field}`")]
    MissingHeader { line: usize, field: &'static str },
    #[error("line {line}: `{value}` is not a valid {field}")]
    BadNumber {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: unknown operation `{op}`")]
    UnknownOp { line: usize, op: String },
    #[error("line {line}: operation is missing an operand")]
    MissingOperand { line: usize },
    #[error("line {line}: trailing input `{extra}`")]
    TrailingInput { line: usize, extra: String },
    #[error("line {line}: id {id} is outside the declared {num_ids} ids")]
    IdOutOfRange { line: usize, id: usize, num_ids: usize },
    #[error("header declares {declared} ops, trace has {found}")]
    OpCountMismatch { declared: usize, found: usize },
    #[error("header declares {num_ids} ids for only {ops} ops")]
    TooManyIds { num_ids: usize, ops: usize },
}

/// One trace operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    Alloc { id: usize, size: usize },
    Free { id: usize },
    Realloc { id: usize, size: usize },
}

impl TraceOp {
    #[must_use]
    pub const fn id(&self) -> usize {
        match *self {
            Self::Alloc { id, .. } | Self::Free { id } | Self::Realloc { id, .. } => id,
        }
    }
}

/// A parsed trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub name: String,
    pub suggested_heap: usize,
    pub num_ids: usize,
    pub weight: u32,
    pub ops: Vec<TraceOp>,
}

impl Trace {
    /// Parses trace text. `name` labels reports.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, TraceError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

        let mut header = |field: &'static str| -> Result<(usize, usize), TraceError> {
            let (line, raw) = lines.next().ok_or(TraceError::MissingHeader {
                line: text.lines().count() + 1,
                field,
            })?;
            Ok((line, parse_number(line, field, raw)?))
        };
        let (_, suggested_heap) = header("suggested heap size")?;
        let (_, num_ids) = header("id count")?;
        let (_, declared) = header("op count")?;
        let (weight_line, weight) = header("weight")?;
        let weight = u32::try_from(weight).map_err(|_| TraceError::BadNumber {
            line: weight_line,
            field: "weight",
            value: weight.to_string(),
        })?;

        // Every op takes at least one line of input.
        let mut ops = Vec::with_capacity(declared.min(text.len() / 2));
        for (line, raw) in lines {
            ops.push(parse_op(line, raw, num_ids)?);
        }
        if ops.len() != declared {
            return Err(TraceError::OpCountMismatch {
                declared,
                found: ops.len(),
            });
        }
        if num_ids > ops.len().max(1) {
            return Err(TraceError::TooManyIds {
                num_ids,
                ops: ops.len(),
            });
        }

        Ok(Self {
            name: name.into(),
            suggested_heap,
            num_ids,
            weight,
            ops,
        })
    }

    /// Reads and parses a trace file, named after its file stem.
    pub fn from_file(path: &Path) -> Result<Self, TraceError> {
        let text = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .map_or_else(|| path.display().to_string(), |stem| stem.to_string_lossy().into_owned());
        Self::parse(name, &text)
    }

    /// Renders the trace in file format.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.suggested_heap);
        let _ = writeln!(out, "{}", self.num_ids);
        let _ = writeln!(out, "{}", self.ops.len());
        let _ = writeln!(out, "{}", self.weight);
        for op in &self.ops {
            let _ = match *op {
                TraceOp::Alloc { id, size } => writeln!(out, "a {id} {size}"),
                TraceOp::Free { id } => writeln!(out, "f {id}"),
                TraceOp::Realloc { id, size } => writeln!(out, "r {id} {size}"),
            };
        }
        out
    }
}

fn parse_number(line: usize, field: &'static str, raw: &str) -> Result<usize, TraceError> {
    raw.parse::<usize>().map_err(|_| TraceError::BadNumber {
        line,
        field,
        value: raw.to_string(),
    })
}

fn parse_op(line: usize, raw: &str, num_ids: usize) -> Result<TraceOp, TraceError> {
    let mut fields = raw.split_whitespace();
    let kind = fields.next().unwrap_or_default();
    let mut operand = |field: &'static str| -> Result<usize, TraceError> {
        let raw = fields.next().ok_or(TraceError::MissingOperand { line })?;
        parse_number(line, field, raw)
    };

    let op = match kind {
        "a" => TraceOp::Alloc {
            id: operand("id")?,
            size: operand("size")?,
        },
        "f" => TraceOp::Free { id: operand("id")? },
        "r" => TraceOp::Realloc {
            id: operand("id")?,
            size: operand("size")?,
        },
        other => {
            return Err(TraceError::UnknownOp {
                line,
                op: other.to_string(),
            });
        }
    };
    if let Some(extra) = fields.next() {
        return Err(TraceError::TrailingInput {
            line,
            extra: extra.to_string(),
        });
    }
    if op.id() >= num_ids {
        return Err(TraceError::IdOutOfRange {
            line,
            id: op.id(),
            num_ids,
        });
    }
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: &str = "\
20000
2
5
1
a 0 2040
a 1 2040
f 1
r 0 48
f 0
";

    #[test]
    fn parses_header_and_ops() {
        let trace = Trace::parse("short", SHORT).unwrap();
        assert_eq!(trace.suggested_heap, 20000);
        assert_eq!(trace.num_ids, 2);
        assert_eq!(trace.weight, 1);
        assert_eq!(
            trace.ops,
            vec![
                TraceOp::Alloc { id: 0, size: 2040 },
                TraceOp::Alloc { id: 1, size: 2040 },
                TraceOp::Free { id: 1 },
                TraceOp::Realloc { id: 0, size: 48 },
                TraceOp::Free { id: 0 },
            ]
        );
    }

    #[test]
    fn text_form_parses_back() {
        let trace = Trace::parse("short", SHORT).unwrap();
        assert_eq!(trace.to_text(), SHORT);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "# generated\n100\n1\n\n1\n1\n# op\na 0 8\n";
        let trace = Trace::parse("c", text).unwrap();
        assert_eq!(trace.ops, vec![TraceOp::Alloc { id: 0, size: 8 }]);
    }

    #[test]
    fn errors_carry_line_numbers() {
        let err = Trace::parse("bad", "100\n1\n1\n1\nx 0 8\n").unwrap_err();
        assert!(matches!(err, TraceError::UnknownOp { line: 5, .. }));
        assert_eq!(err.to_string(), "line 5: unknown operation `x`");

        let err = Trace::parse("bad", "100\n1\n1\n1\na 0\n").unwrap_err();
        assert!(matches!(err, TraceError::MissingOperand { line: 5 }));

        let err = Trace::parse("bad", "100\n1\n1\n1\na 3 8\n").unwrap_err();
        assert!(matches!(err, TraceError::IdOutOfRange { id: 3, .. }));

        let err = Trace::parse("bad", "100\nmany\n").unwrap_err();
        assert!(matches!(err, TraceError::BadNumber { line: 2, .. }));

        let err = Trace::parse("bad", "100\n1\n").unwrap_err();
        assert!(matches!(err, TraceError::MissingHeader { .. }));

        let err = Trace::parse("bad", "100\n1\n2\n1\na 0 8\n").unwrap_err();
        assert!(matches!(
            err,
            TraceError::OpCountMismatch {
                declared: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn oversized_op_count_is_an_error() {
        let text = format!("100\n1\n{}\n1\na 0 8\n", usize::MAX / 2);
        let err = Trace::parse("huge", &text).unwrap_err();
        assert!(matches!(err, TraceError::OpCountMismatch { found: 1, .. }));
    }

    #[test]
    fn oversized_id_count_is_an_error() {
        let text = format!("100\n{}\n1\n1\na 0 8\n", usize::MAX / 2);
        let err = Trace::parse("huge", &text).unwrap_err();
        assert!(matches!(err, TraceError::TooManyIds { ops: 1, .. }));
        assert!(err.to_string().contains("for only 1 ops"));

        let err = Trace::parse("wide", "100\n3\n2\n1\na 0 8\nf 0\n").unwrap_err();
        assert!(matches!(err, TraceError::TooManyIds { num_ids: 3, ops: 2 }));
    }
}
