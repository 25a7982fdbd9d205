//! Error types for the instrumentation engine.

use std::path::PathBuf;

use graft_rules::RuleError;
use graft_unit::{AsmError, CodecError};

/// A single rule could not be applied to a unit.
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    /// The rule's (event, action) pair has no placement.
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("RET cannot be applied to constructor {unit}.{method}")]
    ReturnOnConstructor { unit: String, method: String },

    #[error("no method {method} in {unit}")]
    TargetNotFound { unit: String, method: String },

    #[error("offset {offset} is outside {method} ({len} instructions)")]
    OffsetOutOfRange {
        method: String,
        offset: u32,
        len: usize,
    },

    #[error("no free local slot in {method}")]
    LocalsExhausted { method: String },

    /// Custom code failed to assemble.
    #[error("custom code: {0}")]
    Compile(#[from] AsmError),

    /// The unit could not be parsed, or the rewritten unit failed to verify.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Persisting a unit's pristine bytes failed.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("failed to create backup directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write backup of {unit} to {path}: {source}")]
    Write {
        unit: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Engine startup failed.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start reload thread: {0}")]
    Spawn(#[from] std::io::Error),
}
