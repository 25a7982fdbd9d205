//! The engine context: wires interceptor, backups and reload loop to a host.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use graft_core::{Config, HostRuntime, TraceSink};
use graft_rules::{parse_rules, ParseReport, RuleIndex, RuleSource};
use tracing::{info, warn};

use crate::backup::BackupStore;
use crate::error::EngineError;
use crate::interceptor::Interceptor;
use crate::reload::{ReloadController, ReloadHandle};

/// Name of the backup directory inside a run directory.
pub const BACKUP_DIR: &str = "backup";

/// A running instrumentation engine.
///
/// Owns everything that used to be process-wide: the interceptor (and with
/// it the rule index, backup store and transformed set) and the reload
/// thread. Several engines can coexist, each against its own host.
pub struct Engine {
    run_dir: PathBuf,
    interceptor: Option<Arc<Interceptor>>,
    initial: ParseReport,
    reload: Option<ReloadHandle>,
}

impl Engine {
    /// Start instrumenting `host`.
    ///
    /// Rules come from `config.agent_rules`; malformed entries are logged and
    /// skipped. Units the host already loaded that match a rule are
    /// redelivered right away. With `config_path` and a non-zero refresh
    /// interval the reload loop starts as well; `watch` adds a filesystem
    /// watcher on top of polling.
    pub fn start(
        config: &Config,
        run_dir: &Path,
        config_path: Option<&Path>,
        host: Arc<dyn HostRuntime>,
        sink: Arc<dyn TraceSink>,
        watch: bool,
    ) -> Result<Self, EngineError> {
        let initial = parse_rules(&config.agent_rules);
        if !config.should_instrument {
            info!("instrumentation disabled by configuration");
            return Ok(Self {
                run_dir: run_dir.to_path_buf(),
                interceptor: None,
                initial,
                reload: None,
            });
        }

        let index = RuleIndex::build(&initial.rules);
        info!(
            rules = index.len(),
            rejected = initial.rejected.len(),
            units = index.unit_keys().count(),
            "rules loaded"
        );

        let backups = BackupStore::new(run_dir.join(BACKUP_DIR));
        let interceptor = Arc::new(Interceptor::from_config(config, index, backups, sink));
        let redeliverable = host.supports_redelivery();
        host.install(interceptor.clone(), redeliverable);

        if redeliverable {
            let index = interceptor.index();
            let loaded: Vec<String> = host
                .loaded_units()
                .into_iter()
                .filter(|u| index.matches(&u.replace('/', ".")))
                .collect();
            if !loaded.is_empty() {
                info!(units = loaded.len(), "instrumenting already-loaded units");
                if let Err(e) = host.redeliver(&loaded) {
                    warn!(error = %e, "failed to redeliver loaded units");
                }
            }
        }

        let reload = match (config_path, config.refresh_interval()) {
            (Some(path), Some(interval)) => {
                let controller = ReloadController::new(
                    RuleSource::new(path),
                    Arc::clone(&interceptor),
                    Arc::clone(&host),
                    interval,
                );
                Some(controller.spawn(watch)?)
            }
            _ => None,
        };

        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            interceptor: Some(interceptor),
            initial,
            reload,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// `None` when instrumentation is disabled.
    pub fn interceptor(&self) -> Option<&Arc<Interceptor>> {
        self.interceptor.as_ref()
    }

    /// Parse report for the rules the engine started with.
    pub fn initial_rules(&self) -> &ParseReport {
        &self.initial
    }

    pub fn is_reloading(&self) -> bool {
        self.reload.is_some()
    }

    /// Stop the reload loop. Installed hooks stay with the host.
    pub fn shutdown(mut self) {
        if let Some(reload) = self.reload.take() {
            reload.stop();
        }
        if let Some(icp) = &self.interceptor {
            let stats = icp.stats();
            info!(
                deliveries = stats.deliveries,
                rewrites = stats.rewrites,
                rule_failures = stats.rule_failures,
                backup_failures = stats.backup_failures,
                "engine stopped"
            );
        }
    }
}
