//! Background reload of the rule index.
//!
//! One dedicated thread polls the rule source's modification time every
//! interval (or sooner, when the filesystem watcher fires). A changed file is
//! re-parsed; a clean parse replaces the interceptor's index and replays the
//! affected, already-loaded units through the host. A parse with any rejected
//! entry keeps the old index and is retried on the next tick.

use std::collections::BTreeSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use graft_core::HostRuntime;
use graft_rules::{RuleIndex, RuleSource};
use notify::RecommendedWatcher;
use tracing::{debug, info, warn};

use crate::interceptor::Interceptor;

/// What one [`ReloadController::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The source has not been modified since the last tick.
    Unchanged,
    /// A new index is in force.
    Reloaded {
        /// Lower-cased unit keys whose rules changed.
        affected: BTreeSet<String>,
        /// Loaded units handed back to the host for redelivery.
        redelivered: Vec<String>,
    },
    /// The source changed but could not be adopted; the old index stays.
    Rejected { reason: String },
}

pub struct ReloadController {
    source: RuleSource,
    interceptor: Arc<Interceptor>,
    host: Arc<dyn HostRuntime>,
    interval: Duration,
    last_modified: Option<SystemTime>,
    reparses: u64,
}

impl ReloadController {
    /// The source's current modification time is taken as already seen: the
    /// index the interceptor starts with was built from it.
    pub fn new(
        source: RuleSource,
        interceptor: Arc<Interceptor>,
        host: Arc<dyn HostRuntime>,
        interval: Duration,
    ) -> Self {
        let last_modified = source.modified().ok();
        Self {
            source,
            interceptor,
            host,
            interval,
            last_modified,
            reparses: 0,
        }
    }

    /// How many times the source has been re-read.
    pub fn reparse_count(&self) -> u64 {
        self.reparses
    }

    /// Check the source once and reload when it changed.
    pub fn tick(&mut self) -> TickOutcome {
        let modified = match self.source.modified() {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %self.source.path().display(), error = %e, "rule source unreadable, keeping current rules");
                return TickOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };
        if self.last_modified == Some(modified) {
            return TickOutcome::Unchanged;
        }
        self.reparses += 1;

        let loaded = match self.source.load() {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(path = %self.source.path().display(), error = %e, "failed to reload rules, keeping current rules");
                return TickOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };
        if !loaded.report.is_clean() {
            let reason = format!(
                "{} rejected rule entries (first at position {})",
                loaded.report.rejected.len(),
                loaded.report.rejected[0].position
            );
            warn!(path = %self.source.path().display(), reason = %reason, "rule set rejected, keeping current rules");
            return TickOutcome::Rejected { reason };
        }

        // Only a clean load marks this version as seen; a file caught
        // half-written is read again on the next tick.
        self.last_modified = Some(modified);
        let next = RuleIndex::build(&loaded.report.rules);
        let rules = next.len();
        let previous = self.interceptor.swap_index(next);
        let affected = self.interceptor.index().affected_units(&previous);
        info!(rules, affected = affected.len(), "rules reloaded");

        let redelivered = self.redeliver(&affected);
        TickOutcome::Reloaded {
            affected,
            redelivered,
        }
    }

    fn redeliver(&self, affected: &BTreeSet<String>) -> Vec<String> {
        if affected.is_empty() {
            return Vec::new();
        }
        if !self.host.supports_redelivery() {
            debug!("host cannot redeliver; new rules apply to future loads only");
            return Vec::new();
        }
        let targets: Vec<String> = self
            .host
            .loaded_units()
            .into_iter()
            .filter(|unit| affected.contains(&unit.replace('/', ".").to_lowercase()))
            .collect();
        if targets.is_empty() {
            return targets;
        }
        match self.host.redeliver(&targets) {
            Ok(()) => {
                info!(units = targets.len(), "redelivered affected units");
                targets
            }
            Err(e) => {
                warn!(error = %e, "redelivery failed");
                Vec::new()
            }
        }
    }

    /// Run the loop on a dedicated thread. `watch` additionally registers a
    /// filesystem watcher that wakes the loop early.
    pub fn spawn(self, watch: bool) -> io::Result<ReloadHandle> {
        let (wake_tx, wake_rx) = mpsc::channel();
        let watcher = if watch {
            match self.source.watch(wake_tx.clone()) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(error = %e, "rule source watcher unavailable, polling only");
                    None
                }
            }
        } else {
            None
        };

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("graft-reload".to_string())
            .spawn(move || self.run(&thread_stop, &wake_rx))?;

        Ok(ReloadHandle {
            stop,
            wake: wake_tx,
            thread: Some(thread),
            _watcher: watcher,
        })
    }

    fn run(mut self, stop: &AtomicBool, wake: &Receiver<()>) {
        info!(
            path = %self.source.path().display(),
            interval_ms = self.interval.as_millis() as u64,
            "reload loop started"
        );
        while !stop.load(Ordering::Acquire) {
            match wake.recv_timeout(self.interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if stop.load(Ordering::Acquire) {
                break;
            }
            // collapse bursts of watcher events into one check
            while wake.try_recv().is_ok() {}
            self.tick();
        }
        info!("reload loop stopped");
    }
}

/// Owns the reload thread. Stops it on [`ReloadHandle::stop`] or drop.
pub struct ReloadHandle {
    stop: Arc<AtomicBool>,
    wake: Sender<()>,
    thread: Option<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl ReloadHandle {
    /// Signal the loop and wait for it to finish its current tick.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.wake.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("reload thread panicked");
            }
        }
    }
}

impl Drop for ReloadHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Instant;

    use graft_core::{CapturedTrace, HostError, LoadHook};
    use graft_rules::parse_rules;
    use tempfile::TempDir;

    use super::*;
    use crate::backup::BackupStore;
    use crate::interceptor::LoadFilter;

    /// Records redelivery requests instead of replaying anything.
    struct RecordingHost {
        loaded: Vec<String>,
        redelivered: Mutex<Vec<Vec<String>>>,
        redeliverable: bool,
    }

    impl RecordingHost {
        fn new(loaded: &[&str], redeliverable: bool) -> Arc<Self> {
            Arc::new(Self {
                loaded: loaded.iter().map(|s| s.to_string()).collect(),
                redelivered: Mutex::new(Vec::new()),
                redeliverable,
            })
        }
    }

    impl HostRuntime for RecordingHost {
        fn install(&self, _hook: Arc<dyn LoadHook>, _redeliverable: bool) {}

        fn loaded_units(&self) -> Vec<String> {
            self.loaded.clone()
        }

        fn supports_redelivery(&self) -> bool {
            self.redeliverable
        }

        fn redeliver(&self, units: &[String]) -> Result<(), HostError> {
            self.redelivered.lock().unwrap().push(units.to_vec());
            Ok(())
        }
    }

    fn write_config(path: &Path, rules: &[&str], bump_secs: u64) {
        let mut yaml = String::from("traceFileLocation: /tmp/graft\nagentRules:\n");
        for rule in rules {
            yaml.push_str(&format!("  - \"{}\"\n", rule));
        }
        fs::write(path, yaml).unwrap();
        // make every rewrite visible regardless of timestamp granularity
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + bump_secs);
        fs::File::options().write(true).open(path).unwrap().set_modified(stamp).unwrap();
    }

    fn controller(dir: &TempDir, rules: &[&str], host: Arc<RecordingHost>) -> ReloadController {
        let path = dir.path().join("graft.yaml");
        write_config(&path, rules, 0);
        let interceptor = Arc::new(Interceptor::new(
            RuleIndex::build(&parse_rules(rules).rules),
            BackupStore::new(dir.path().join("backup")),
            LoadFilter::default(),
            false,
            Arc::new(CapturedTrace::new()),
        ));
        ReloadController::new(RuleSource::new(path), interceptor, host, Duration::from_millis(20))
    }

    #[test]
    fn unchanged_source_is_never_reparsed() {
        let dir = TempDir::new().unwrap();
        let mut ctl = controller(&dir, &["demo.A::run@PROFILE"], RecordingHost::new(&[], true));
        for _ in 0..5 {
            assert_eq!(ctl.tick(), TickOutcome::Unchanged);
        }
        assert_eq!(ctl.reparse_count(), 0);
    }

    #[test]
    fn change_swaps_index_and_redelivers_only_affected_loaded_units() {
        let dir = TempDir::new().unwrap();
        let host = RecordingHost::new(&["demo.A", "demo/B", "demo.C", "demo.Z"], true);
        let mut ctl = controller(
            &dir,
            &["demo.A::run@PROFILE", "demo.B::run@PROFILE"],
            Arc::clone(&host),
        );

        write_config(
            ctl.source.path(),
            &["demo.A::run@PROFILE", "demo.C::run@INGRESS::STACK", "demo.D::run@PROFILE"],
            1,
        );
        let TickOutcome::Reloaded { affected, redelivered } = ctl.tick() else {
            panic!("expected reload");
        };
        assert_eq!(affected.into_iter().collect::<Vec<_>>(), ["demo.b", "demo.c", "demo.d"]);
        assert_eq!(redelivered, ["demo/B", "demo.C"]);
        assert_eq!(host.redelivered.lock().unwrap().len(), 1);
        assert_eq!(ctl.reparse_count(), 1);
        assert!(ctl.interceptor.index().matches("demo.D"));

        assert_eq!(ctl.tick(), TickOutcome::Unchanged);
        assert_eq!(ctl.reparse_count(), 1);
    }

    #[test]
    fn partially_invalid_source_keeps_previous_index() {
        let dir = TempDir::new().unwrap();
        let mut ctl = controller(&dir, &["demo.A::run@PROFILE"], RecordingHost::new(&["demo.A"], true));
        write_config(ctl.source.path(), &["demo.B::run@PROFILE", "demo.B::run@NOWHERE"], 1);
        assert!(matches!(ctl.tick(), TickOutcome::Rejected { .. }));
        let index = ctl.interceptor.index();
        assert!(index.matches("demo.A"));
        assert!(!index.matches("demo.B"));
        assert!(matches!(ctl.tick(), TickOutcome::Rejected { .. }));
        assert_eq!(ctl.reparse_count(), 2);
    }

    #[test]
    fn rejected_source_is_retried_until_clean() {
        let dir = TempDir::new().unwrap();
        let mut ctl = controller(&dir, &["demo.A::run@PROFILE"], RecordingHost::new(&[], true));
        // a write caught halfway, then completed within the same timestamp
        write_config(ctl.source.path(), &["demo.B::run@PROF"], 1);
        assert!(matches!(ctl.tick(), TickOutcome::Rejected { .. }));
        write_config(ctl.source.path(), &["demo.B::run@PROFILE"], 1);
        assert!(matches!(ctl.tick(), TickOutcome::Reloaded { .. }));
        assert!(ctl.interceptor.index().matches("demo.B"));
        assert_eq!(ctl.tick(), TickOutcome::Unchanged);
    }

    #[test]
    fn missing_source_is_rejected_not_fatal() {
        let dir = TempDir::new().unwrap();
        let mut ctl = controller(&dir, &["demo.A::run@PROFILE"], RecordingHost::new(&[], true));
        fs::remove_file(ctl.source.path()).unwrap();
        assert!(matches!(ctl.tick(), TickOutcome::Rejected { .. }));
        assert!(ctl.interceptor.index().matches("demo.A"));
    }

    #[test]
    fn hosts_without_redelivery_only_get_the_new_index() {
        let dir = TempDir::new().unwrap();
        let host = RecordingHost::new(&["demo.A"], false);
        let mut ctl = controller(&dir, &[], Arc::clone(&host));
        write_config(ctl.source.path(), &["demo.A::run@PROFILE"], 1);
        let TickOutcome::Reloaded { redelivered, .. } = ctl.tick() else {
            panic!("expected reload");
        };
        assert!(redelivered.is_empty());
        assert!(host.redelivered.lock().unwrap().is_empty());
    }

    #[test]
    fn background_loop_picks_up_changes_and_stops() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, &[], RecordingHost::new(&[], true));
        let path = ctl.source.path().to_path_buf();
        let interceptor = Arc::clone(&ctl.interceptor);
        let handle = ctl.spawn(false).unwrap();

        write_config(&path, &["demo.A::run@PROFILE"], 1);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !interceptor.index().matches("demo.A") && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(interceptor.index().matches("demo.A"));
        handle.stop();
    }
}
