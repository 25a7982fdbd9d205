//! Output surface for diagnostics emitted by instrumented code.
//!
//! Lines take the form `{<unit>.<method>} | <EVENT> | <TAG> | <payload>`.
//! Stack captures and errors raised inside injected snippets get their own
//! entry points so a sink can format them differently.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Local;

/// Receives diagnostic output. Implementations must be cheap and must not panic.
pub trait TraceSink: Send + Sync {
    fn trace(&self, line: &str);
    /// `frames` is innermost first.
    fn stack(&self, header: &str, frames: &[String]);
    fn error(&self, line: &str);
}

/// Appends diagnostics to `trace.log` inside the per-run trace directory.
pub struct TraceFile {
    path: PathBuf,
    out: Mutex<BufWriter<File>>,
}

impl TraceFile {
    pub const FILE_NAME: &'static str = "trace.log";

    /// Open (or create) `trace.log` under `dir`, creating `dir` if needed.
    pub fn open(dir: &Path) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_entry(&self, level: &str, body: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        // A failed diagnostic write must never reach instrumented code.
        let _ = writeln!(out, "{stamp} {level} {body}").and_then(|_| out.flush());
    }
}

impl TraceSink for TraceFile {
    fn trace(&self, line: &str) {
        self.write_entry("TRACE", line);
    }

    fn stack(&self, header: &str, frames: &[String]) {
        let mut body = String::from(header);
        for frame in frames {
            body.push_str("\n\tat ");
            body.push_str(frame);
        }
        self.write_entry("STACK", &body);
    }

    fn error(&self, line: &str) {
        self.write_entry("ERROR", line);
    }
}

/// A single captured diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceRecord {
    Trace(String),
    Stack { header: String, frames: Vec<String> },
    Error(String),
}

/// In-memory sink; lets callers inspect exactly what instrumented code emitted.
#[derive(Debug, Default)]
pub struct CapturedTrace {
    records: Mutex<Vec<TraceRecord>>,
}

impl CapturedTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Plain trace lines only, in emission order.
    pub fn lines(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                TraceRecord::Trace(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                TraceRecord::Error(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn push(&self, record: TraceRecord) {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record);
    }
}

impl TraceSink for CapturedTrace {
    fn trace(&self, line: &str) {
        self.push(TraceRecord::Trace(line.to_string()));
    }

    fn stack(&self, header: &str, frames: &[String]) {
        self.push(TraceRecord::Stack {
            header: header.to_string(),
            frames: frames.to_vec(),
        });
    }

    fn error(&self, line: &str) {
        self.push(TraceRecord::Error(line.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_file_appends_levelled_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = TraceFile::open(&dir.path().join("run")).unwrap();
        sink.trace("{a.B.c} | INGRESS | STACK");
        sink.stack("{a.B.c} | INGRESS | STACK", &["a.B.c".to_string(), "a.B.main".to_string()]);
        sink.error("boom");

        let written = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert!(lines[0].ends_with("TRACE {a.B.c} | INGRESS | STACK"));
        assert!(lines[1].ends_with("STACK {a.B.c} | INGRESS | STACK"));
        assert_eq!(lines[2], "\tat a.B.c");
        assert_eq!(lines[3], "\tat a.B.main");
        assert!(lines[4].ends_with("ERROR boom"));
    }

    #[test]
    fn captured_trace_separates_kinds() {
        let sink = CapturedTrace::new();
        sink.trace("one");
        sink.error("bad");
        sink.stack("hdr", &[]);
        sink.trace("two");
        assert_eq!(sink.lines(), vec!["one", "two"]);
        assert_eq!(sink.errors(), vec!["bad"]);
        assert_eq!(sink.records().len(), 4);
        sink.clear();
        assert!(sink.records().is_empty());
    }
}
