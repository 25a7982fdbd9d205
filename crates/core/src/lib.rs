pub mod config;
pub mod error;
pub mod host;
pub mod process;
pub mod trace;

pub use config::{create_run_dir, Config};
pub use error::*;
pub use host::{HostError, HostRuntime, LoadHook};
pub use process::trace_startup_details;
pub use trace::{CapturedTrace, TraceFile, TraceRecord, TraceSink};
