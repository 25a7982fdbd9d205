//! Errors raised while running unit code.

/// A failure during execution.
///
/// Everything except [`ExecError::StackOverflow`] is catchable by a guard,
/// the way ordinary exceptions are; exhausting the call stack is not.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    #[error("{0}")]
    Thrown(String),

    #[error("unit not loaded: {0}")]
    NoSuchUnit(String),

    #[error("no method {unit}::{method} taking {argc} arguments")]
    NoSuchMethod {
        unit: String,
        method: String,
        argc: usize,
    },

    #[error("operand stack underflow in {0}")]
    StackUnderflow(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivideByZero,

    #[error("integer overflow")]
    Overflow,

    #[error("`caught` outside a guard handler")]
    NothingCaught,

    #[error("heap dump failed: {0}")]
    HeapDump(String),

    #[error("{0} ran off the end of its body")]
    FellThrough(String),

    #[error("call stack exceeded {0} frames")]
    StackOverflow(usize),
}

impl ExecError {
    pub fn is_catchable(&self) -> bool {
        !matches!(self, ExecError::StackOverflow(_))
    }
}
