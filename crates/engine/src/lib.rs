//! Rule-driven instrumentation of loaded units.
//!
//! The [`Interceptor`] sits in the host's load path and rewrites units that
//! rules target, after backing up their pristine bytes. The
//! [`ReloadController`] keeps the rule index in step with the config file and
//! asks the host to replay units whose rules changed. [`Engine`] ties the
//! pieces together.

pub mod backup;
pub mod engine;
pub mod error;
pub mod injector;
pub mod interceptor;
pub mod reload;

pub use backup::{BackupOutcome, BackupStore};
pub use engine::{Engine, BACKUP_DIR};
pub use error::{BackupError, EngineError, InjectError};
pub use injector::{inject, marker_for};
pub use interceptor::{Interceptor, InterceptorStats, LoadFilter, StatsSnapshot};
pub use reload::{ReloadController, ReloadHandle, TickOutcome};
