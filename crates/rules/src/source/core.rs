//! Core [`RuleSource`] struct.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::SystemTime;

use graft_core::Config;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::parser::{parse_rules, ParseReport};

use super::watcher::is_relevant;

/// A config file and everything parsed out of it.
#[derive(Debug, Clone)]
pub struct LoadedRules {
    pub config: Config,
    pub report: ParseReport,
}

/// The config file that rules are read from.
#[derive(Debug, Clone)]
pub struct RuleSource {
    path: PathBuf,
}

impl RuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last modification time of the file.
    pub fn modified(&self) -> Result<SystemTime> {
        Ok(fs::metadata(&self.path)?.modified()?)
    }

    /// Read the file, apply env overrides and parse every rule entry.
    ///
    /// Malformed entries do not fail the load; they are listed in the report.
    pub fn load(&self) -> Result<LoadedRules> {
        let config = Config::from_file(&self.path)?;
        let report = parse_rules(&config.agent_rules);
        debug!(
            path = %self.path.display(),
            rules = report.rules.len(),
            rejected = report.rejected.len(),
            "parsed rule source"
        );
        Ok(LoadedRules { config, report })
    }

    /// Start a watcher that sends on `wake` whenever the file is written,
    /// created, renamed or removed.
    ///
    /// The parent directory is watched so editors that replace the file by
    /// renaming are still seen. The returned watcher must be kept alive.
    pub fn watch(&self, wake: Sender<()>) -> Result<RecommendedWatcher> {
        let file_name: OsString = self.path.file_name().map(OsString::from).unwrap_or_default();
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if is_relevant(&event, &file_name) {
                        let _ = wake.send(());
                    }
                }
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(path = %self.path.display(), "watching rule source for changes");
        Ok(watcher)
    }
}
