//! File-backed rule source with change detection.
//!
//! Rules live in the `agentRules` list of the engine's YAML config file.
//! [`RuleSource`] reads and parses that file, reports its modification time
//! and can register a filesystem watcher that signals when it changes.

mod core;
mod watcher;

#[cfg(test)]
mod tests;

pub use self::core::{LoadedRules, RuleSource};
