//! The load hook: decides per delivery whether a unit is rewritten.

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashSet;
use graft_core::{Config, LoadHook, TraceSink};
use graft_rules::{Rule, RuleIndex};
use graft_unit::UnitEditor;
use tracing::{debug, error, warn};

use crate::backup::BackupStore;
use crate::error::InjectError;
use crate::injector;

/// Unit-name prefixes that never produce load trace lines.
#[derive(Debug, Clone, Default)]
pub struct LoadFilter {
    excluded: Vec<String>,
}

impl LoadFilter {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.load_trace_exclusions.iter().cloned())
    }

    pub fn is_excluded(&self, unit: &str) -> bool {
        self.excluded.iter().any(|p| unit.starts_with(p.as_str()))
    }
}

/// Delivery counters.
#[derive(Debug, Default)]
pub struct InterceptorStats {
    deliveries: AtomicU64,
    passthroughs: AtomicU64,
    rewrites: AtomicU64,
    rule_failures: AtomicU64,
    backup_failures: AtomicU64,
}

/// Point-in-time copy of [`InterceptorStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub deliveries: u64,
    pub passthroughs: u64,
    pub rewrites: u64,
    pub rule_failures: u64,
    pub backup_failures: u64,
}

impl InterceptorStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            deliveries: self.deliveries.load(Ordering::Relaxed),
            passthroughs: self.passthroughs.load(Ordering::Relaxed),
            rewrites: self.rewrites.load(Ordering::Relaxed),
            rule_failures: self.rule_failures.load(Ordering::Relaxed),
            backup_failures: self.backup_failures.load(Ordering::Relaxed),
        }
    }
}

/// Called by the host for every unit it loads or reloads.
///
/// The rule index is read without locking; the reload thread replaces it
/// wholesale. Each delivery parses its own editor per rule and drops it
/// before returning, so no parsed state outlives a call.
pub struct Interceptor {
    index: ArcSwap<RuleIndex>,
    backups: BackupStore,
    filter: LoadFilter,
    trace_loads: bool,
    sink: Arc<dyn TraceSink>,
    transformed: DashSet<String>,
    stats: InterceptorStats,
}

impl Interceptor {
    pub fn new(
        index: RuleIndex,
        backups: BackupStore,
        filter: LoadFilter,
        trace_loads: bool,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            index: ArcSwap::from_pointee(index),
            backups,
            filter,
            trace_loads,
            sink,
            transformed: DashSet::new(),
            stats: InterceptorStats::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        index: RuleIndex,
        backups: BackupStore,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self::new(index, backups, LoadFilter::from_config(config), config.trace_unit_loads, sink)
    }

    /// The index in force right now.
    pub fn index(&self) -> Arc<RuleIndex> {
        self.index.load_full()
    }

    /// Install a new index, returning the one it replaces.
    pub fn swap_index(&self, index: RuleIndex) -> Arc<RuleIndex> {
        self.index.swap(Arc::new(index))
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether `unit` has been rewritten at least once.
    pub fn is_transformed(&self, unit: &str) -> bool {
        self.transformed.contains(unit)
    }

    /// Handle one delivery. Returns the input unchanged unless at least one
    /// rule rewrote the unit.
    pub fn intercept<'a>(&self, name: Option<&str>, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        InterceptorStats::bump(&self.stats.deliveries);
        let Some(raw) = name else {
            warn!("delivery without a unit name, passing through");
            return self.pass(bytes);
        };
        let name = normalise(raw);

        if self.trace_loads && !self.filter.is_excluded(&name) {
            self.sink
                .trace(&format!("LOAD | {} | {} bytes", name, bytes.len()));
        }

        let index = self.index.load();
        let rules = index.rules_for(&name);
        if rules.is_empty() {
            return self.pass(bytes);
        }

        if let Err(e) = self.backups.ensure(&name, bytes) {
            InterceptorStats::bump(&self.stats.backup_failures);
            error!(unit = %name, error = %e, "backup failed, leaving unit uninstrumented");
            return self.pass(bytes);
        }

        let first = self.transformed.insert(name.to_string());
        if first {
            debug!(unit = %name, rules = rules.len(), "transforming unit");
        } else {
            debug!(unit = %name, rules = rules.len(), "re-transforming unit");
        }

        match self.rewrite(&name, bytes, rules) {
            Some(out) => {
                InterceptorStats::bump(&self.stats.rewrites);
                Cow::Owned(out)
            }
            None => self.pass(bytes),
        }
    }

    fn pass<'a>(&self, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        InterceptorStats::bump(&self.stats.passthroughs);
        Cow::Borrowed(bytes)
    }

    /// Apply rules in order, each to the bytes the previous one produced.
    /// A failing rule is logged and skipped. `None` when nothing changed.
    fn rewrite(&self, unit: &str, bytes: &[u8], rules: &[Rule]) -> Option<Vec<u8>> {
        let mut current: Option<Vec<u8>> = None;
        for rule in rules {
            let input = current.as_deref().unwrap_or(bytes);
            match apply_rule(input, rule) {
                Ok(Some(out)) => current = Some(out),
                Ok(None) => {}
                Err(e) => {
                    InterceptorStats::bump(&self.stats.rule_failures);
                    warn!(unit = %unit, rule = %rule, error = %e, "rule not applied");
                }
            }
        }
        current
    }
}

/// Parse, inject one rule, re-serialize. `None` when the rule was already present.
fn apply_rule(bytes: &[u8], rule: &Rule) -> Result<Option<Vec<u8>>, InjectError> {
    let mut editor = UnitEditor::parse(bytes)?;
    if injector::inject(&mut editor, rule)? == 0 {
        return Ok(None);
    }
    Ok(Some(editor.finish()?))
}

impl LoadHook for Interceptor {
    fn on_load<'a>(&self, name: Option<&str>, bytes: &'a [u8]) -> Cow<'a, [u8]> {
        self.intercept(name, bytes)
    }
}

/// `demo/Foo` → `demo.Foo`.
fn normalise(name: &str) -> Cow<'_, str> {
    if name.contains('/') {
        Cow::Owned(name.replace('/', "."))
    } else {
        Cow::Borrowed(name)
    }
}
