//! Error types for rule parsing, mapping and loading.

use crate::model::{Action, Event};

/// Why a single rule entry was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("missing '::' between unit and method")]
    MissingMethod,

    #[error("missing '@' before the event")]
    MissingEvent,

    #[error("unit name is empty")]
    EmptyUnit,

    #[error("method name is empty")]
    EmptyMethod,

    #[error("names must not contain whitespace")]
    Whitespace,

    #[error("unknown event '{0}'")]
    UnknownEvent(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("CODEPOINT requires an offset, e.g. @CODEPOINT(4)")]
    MissingOffset,

    #[error("invalid offset '{0}'")]
    InvalidOffset(String),

    #[error("{0} does not take an offset")]
    UnexpectedOffset(Event),

    #[error("{0} requires an action")]
    MissingAction(Event),

    #[error("PROFILE does not take an action (got {0})")]
    UnexpectedAction(Action),

    #[error("ADD requires code")]
    MissingCode,

    #[error("{0} does not take code")]
    UnexpectedCode(Action),
}

/// Errors raised when applying or loading rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("{action} is not supported at {event}")]
    Unsupported { event: Event, action: Action },

    #[error("{0} rule has no action")]
    MissingAction(Event),

    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The rule source could not be read as configuration.
    #[error("config error: {0}")]
    Config(#[from] graft_core::ConfigError),

    /// Filesystem watcher error.
    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;
