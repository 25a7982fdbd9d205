//! Collaboration surface between the instrumentation engine and the runtime
//! that loads units of code.
//!
//! The runtime calls a [`LoadHook`] for every unit it loads (or reloads) and
//! uses whatever bytes the hook hands back. The engine drives the runtime
//! through [`HostRuntime`] to replay already-loaded units after a rule change.

use std::borrow::Cow;
use std::sync::Arc;

/// Errors reported by a host runtime.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The runtime cannot replay already-loaded units.
    #[error("redelivery is not supported by this runtime")]
    RedeliveryUnsupported,

    /// A named unit is not loaded.
    #[error("unit not loaded: {0}")]
    NotLoaded(String),

    /// The bytes handed back by a hook (or supplied by a loader) were rejected.
    #[error("unit {unit} rejected: {reason}")]
    Rejected { unit: String, reason: String },
}

/// Callback invoked once per unit delivery.
///
/// `name` is the unit's fully-qualified name as supplied by the runtime; it
/// may be absent. Implementations must never panic and must return the input
/// unchanged (borrowed) when they have nothing to do.
pub trait LoadHook: Send + Sync {
    fn on_load<'a>(&self, name: Option<&str>, bytes: &'a [u8]) -> Cow<'a, [u8]>;
}

/// Operations the engine needs from the runtime.
pub trait HostRuntime: Send + Sync {
    /// Register a load hook. When `redeliverable` is set the hook also sees
    /// units replayed through [`HostRuntime::redeliver`].
    fn install(&self, hook: Arc<dyn LoadHook>, redeliverable: bool);

    /// Names of all currently loaded units.
    fn loaded_units(&self) -> Vec<String>;

    /// Whether [`HostRuntime::redeliver`] is available.
    fn supports_redelivery(&self) -> bool;

    /// Pass the named, already-loaded units through the redeliverable hooks again.
    fn redeliver(&self, units: &[String]) -> Result<(), HostError>;
}
