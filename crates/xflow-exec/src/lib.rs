#![forbid(unsafe_code)]
//! xflow-exec: scheduling and statement execution.
//!
//! The DFS tree scheduler walks one graph on the caller's thread, running
//! whichever stream the root's demand reaches. `Engine` sequences one
//! statement: build, acquire resources, open, read until EOS, close, return
//! resources, on every exit path.

pub mod error;
#[cfg(feature = "tracing")]
pub mod metrics;
pub mod runtime;
pub mod scheduler;

pub use error::{ExecError, Result};
pub use runtime::{Engine, RunOutput};
pub use scheduler::{DfsTreeScheduler, Scheduler, SchedulerConfig};
