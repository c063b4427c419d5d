#![forbid(unsafe_code)]
//! xflow-operators: the execution-stream contract and the streams built on it.
//!
//! Design intent:
//! - `BufAccessor` is the only channel between two streams; its state machine
//!   is enforced with assertions, not locks.
//! - Streams get everything through per-call contexts; none of them can reach
//!   the graph that owns it.
//! - Scratch memory comes from the stream's `QuotaPageAccessor` (`xflow-mem`).

pub mod adapter;
pub mod barrier;
pub mod buffer;
pub mod conduit;
pub mod context;
pub mod count;
pub mod filter;
pub mod mock;
pub mod params;
pub mod registry;
pub mod source;
pub mod splitter;
pub mod traits;
pub mod unique;

pub use buffer::{BufAccessor, BufProvision, BufState, BufferError};
pub use context::{OpenContext, PrepareContext, StreamContext};
pub use registry::StreamRegistry;
pub use traits::{ExecResult, ExecStream, OpError, Quantum};
