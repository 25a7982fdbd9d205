//! Bounded heap snapshots.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;
use tracing::info;

/// One loaded unit as it appears in a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct UnitSummary {
    pub name: String,
    pub methods: Vec<String>,
}

/// Contents of a `heap_<n>.json` file.
#[derive(Debug, Clone, Serialize)]
pub struct HeapSnapshot {
    pub captured_at: String,
    /// Innermost frame first.
    pub call_stack: Vec<String>,
    pub units: Vec<UnitSummary>,
}

/// Writes at most `max` snapshots into `dir`.
pub struct HeapDumper {
    dir: PathBuf,
    max: u32,
    taken: AtomicU32,
}

impl HeapDumper {
    pub fn new(dir: impl Into<PathBuf>, max: u32) -> Self {
        Self {
            dir: dir.into(),
            max,
            taken: AtomicU32::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshots written so far.
    pub fn taken(&self) -> u32 {
        self.taken.load(Ordering::Relaxed)
    }

    /// Write `snapshot` unless the limit is reached. Returns the file written.
    pub fn dump(&self, snapshot: &HeapSnapshot) -> io::Result<Option<PathBuf>> {
        let claimed = self
            .taken
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max).then_some(n + 1));
        let n = match claimed {
            Ok(prev) => prev + 1,
            Err(_) => return Ok(None),
        };

        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("heap_{}.json", n));
        let out = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(out, snapshot)?;
        info!(path = %path.display(), "heap snapshot written");
        Ok(Some(path))
    }
}
