//! In-process unit runtime with load hooks and redelivery.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use graft_core::{HostError, HostRuntime, LoadHook, TraceSink};
use graft_unit::{codec, Unit, Value, CONSTRUCTOR_NAME};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::ExecError;
use crate::heap::{HeapDumper, HeapSnapshot, UnitSummary};
use crate::interp::Interp;

struct Hook {
    hook: Arc<dyn LoadHook>,
    redeliverable: bool,
}

struct Loaded {
    /// Bytes as the loader first supplied them, before any hook.
    pristine: Arc<Vec<u8>>,
    unit: Arc<Unit>,
}

/// A runtime that loads units through hooks and interprets their code.
///
/// Loading may happen from many threads at once; hooks run outside every
/// runtime lock, the way class-file transformers run on loader threads.
pub struct VirtualRuntime {
    hooks: RwLock<Vec<Hook>>,
    units: RwLock<HashMap<String, Loaded>>,
    sink: Arc<dyn TraceSink>,
    heap: HeapDumper,
    printed: Mutex<Vec<String>>,
    echo: bool,
    epoch: Instant,
}

impl VirtualRuntime {
    pub fn new(sink: Arc<dyn TraceSink>, heap: HeapDumper) -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            units: RwLock::new(HashMap::new()),
            sink,
            heap,
            printed: Mutex::new(Vec::new()),
            echo: false,
            epoch: Instant::now(),
        }
    }

    /// Also write `print` output to the process's stdout.
    pub fn with_stdout(mut self) -> Self {
        self.echo = true;
        self
    }

    pub(crate) fn sink(&self) -> &dyn TraceSink {
        self.sink.as_ref()
    }

    pub(crate) fn unit(&self, name: &str) -> Option<Arc<Unit>> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|l| Arc::clone(&l.unit))
    }

    /// The unit currently in force under `name`, as the hooks left it.
    pub fn loaded(&self, name: &str) -> Option<Arc<Unit>> {
        self.unit(name)
    }

    pub(crate) fn print(&self, text: &str) {
        if self.echo {
            println!("{}", text);
        }
        self.printed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }

    /// Everything `print` produced so far.
    pub fn printed(&self) -> Vec<String> {
        self.printed.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub(crate) fn clock_nanos(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    pub(crate) fn heap_dump(&self, call_stack: Vec<String>) -> std::io::Result<()> {
        let units = self
            .units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|l| UnitSummary {
                name: l.unit.name.clone(),
                methods: l.unit.methods.iter().map(|m| m.signature()).collect(),
            })
            .collect();
        let snapshot = HeapSnapshot {
            captured_at: chrono::Local::now().to_rfc3339(),
            call_stack,
            units,
        };
        self.heap.dump(&snapshot)?;
        Ok(())
    }

    pub fn heap_dumps_taken(&self) -> u32 {
        self.heap.taken()
    }

    fn hooks(&self, redelivery: bool) -> Vec<Arc<dyn LoadHook>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !redelivery || h.redeliverable)
            .map(|h| Arc::clone(&h.hook))
            .collect()
    }

    /// Pass `bytes` through `hooks` in order, then decode the result.
    fn transform(name: &str, bytes: &[u8], hooks: &[Arc<dyn LoadHook>]) -> Result<Unit, HostError> {
        let mut current: Cow<'_, [u8]> = Cow::Borrowed(bytes);
        for hook in hooks {
            let replaced = match hook.on_load(Some(name), &current) {
                Cow::Owned(out) => Some(out),
                Cow::Borrowed(_) => None,
            };
            if let Some(out) = replaced {
                current = Cow::Owned(out);
            }
        }
        let unit = codec::decode(&current).map_err(|e| HostError::Rejected {
            unit: name.to_string(),
            reason: e.to_string(),
        })?;
        if unit.name != name {
            return Err(HostError::Rejected {
                unit: name.to_string(),
                reason: format!("bytes declare unit {}", unit.name),
            });
        }
        Ok(unit)
    }

    /// Load a unit through every installed hook.
    pub fn define(&self, name: &str, bytes: &[u8]) -> Result<(), HostError> {
        if self
            .units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
        {
            return Err(HostError::Rejected {
                unit: name.to_string(),
                reason: "already loaded".to_string(),
            });
        }
        let unit = Self::transform(name, bytes, &self.hooks(false))?;
        debug!(unit = %name, methods = unit.methods.len(), "unit defined");
        self.units
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                name.to_string(),
                Loaded {
                    pristine: Arc::new(bytes.to_vec()),
                    unit: Arc::new(unit),
                },
            );
        Ok(())
    }

    /// Load many units in parallel. Results are in input order.
    pub fn define_all(&self, units: &[(String, Vec<u8>)]) -> Vec<Result<(), HostError>> {
        units
            .par_iter()
            .map(|(name, bytes)| self.define(name, bytes))
            .collect()
    }

    /// Run `unit::method` with `args`.
    pub fn call(&self, unit: &str, method: &str, args: Vec<Value>) -> Result<Option<Value>, ExecError> {
        Interp::new(self).call(unit, method, args)
    }

    /// Run the constructor of `unit` that takes `args`.
    pub fn instantiate(&self, unit: &str, args: Vec<Value>) -> Result<(), ExecError> {
        Interp::new(self).call(unit, CONSTRUCTOR_NAME, args).map(|_| ())
    }
}

impl HostRuntime for VirtualRuntime {
    fn install(&self, hook: Arc<dyn LoadHook>, redeliverable: bool) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Hook { hook, redeliverable });
    }

    fn loaded_units(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn supports_redelivery(&self) -> bool {
        true
    }

    /// Replay each unit's pristine bytes through the redeliverable hooks and
    /// swap in the result. A unit whose new bytes are rejected keeps its
    /// current code; the first such error is returned after all units ran.
    fn redeliver(&self, units: &[String]) -> Result<(), HostError> {
        let hooks = self.hooks(true);
        let mut first_err = None;
        for name in units {
            let pristine = self
                .units
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
                .map(|l| Arc::clone(&l.pristine));
            let result = match pristine {
                None => Err(HostError::NotLoaded(name.clone())),
                Some(bytes) => Self::transform(name, &bytes, &hooks).map(|unit| {
                    if let Some(loaded) = self
                        .units
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_mut(name)
                    {
                        loaded.unit = Arc::new(unit);
                    }
                }),
            };
            if let Err(e) = result {
                warn!(unit = %name, error = %e, "redelivery rejected");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
