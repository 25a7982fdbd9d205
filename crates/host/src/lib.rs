//! A small in-process runtime for units.
//!
//! [`VirtualRuntime`] loads unit bytes through installed
//! [`LoadHook`](graft_core::LoadHook)s, keeps the pristine bytes for
//! redelivery and interprets method bodies on the calling thread.

mod error;
mod heap;
mod interp;
mod runtime;

pub use error::ExecError;
pub use heap::{HeapDumper, HeapSnapshot, UnitSummary};
pub use interp::MAX_DEPTH;
pub use runtime::VirtualRuntime;
