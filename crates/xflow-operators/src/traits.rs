//! The execution-stream contract.
//!
//! A scheduler drives a stream through `prepare` (once), `open` (one or more
//! times), any number of `execute` calls, and `close`. Streams never hold a
//! reference to their graph: everything they may touch is handed to them in
//! the context argument of each call.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use xflow_core::id::DynamicParamId;
use xflow_core::resource::{ResourceQuantity, ResourceRequirements};

use crate::buffer::{BufProvision, BufferError};
use crate::context::{OpenContext, PrepareContext, StreamContext};

#[derive(Debug, Error)]
pub enum OpError {
    #[error("planning error: {0}")]
    Plan(String),

    #[error("execution error: {0}")]
    Exec(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("memory error: {0}")]
    Mem(#[from] xflow_mem::Error),

    #[error(transparent)]
    Core(#[from] xflow_core::error::Error),

    /// The abort flag was seen inside a long-running `execute`.
    #[error("aborted")]
    Aborted,
}

/// Why `execute` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecResult {
    /// An input ran dry; the stream asked for production on it.
    Underflow,
    /// An output is full or was handed over; its consumer has to run.
    Overflow,
    /// Every output is at (or pending) EOS.
    Eos,
    /// The quantum ran out with work left; call again.
    QuantumExpired,
    /// Nothing to do until some external event. Not valid under the DFS scheduler.
    Yield,
}

impl fmt::Display for ExecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecResult::Underflow => "underflow",
            ExecResult::Overflow => "overflow",
            ExecResult::Eos => "eos",
            ExecResult::QuantumExpired => "quantum_expired",
            ExecResult::Yield => "yield",
        };
        f.write_str(s)
    }
}

/// Work budget for one `execute` call, counted in tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantum {
    pub max_tuples: u32,
}

impl Quantum {
    pub const UNBOUNDED: Quantum = Quantum {
        max_tuples: u32::MAX,
    };

    pub fn tuples(max_tuples: u32) -> Self {
        Self {
            max_tuples: max_tuples.max(1),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_tuples == u32::MAX
    }
}

impl Default for Quantum {
    fn default() -> Self {
        Self::UNBOUNDED
    }
}

/// One node of an execution graph.
///
/// Invariants:
/// - the output shapes fixed in `prepare` never change afterwards
/// - `execute` never blocks unless `may_block` says so
/// - every result other than `Yield`/`QuantumExpired` comes with the matching
///   state change on an adjacent buffer
pub trait ExecStream: Send {
    /// Registered kind name (stable).
    fn kind(&self) -> &'static str;

    /// Validate inputs and fix the shape of every output.
    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError>;

    fn resource_requirements(&self) -> ResourceRequirements {
        ResourceRequirements::default()
    }

    /// Told what was granted; returns what the stream actually holds. May be
    /// called again while open to ask for a smaller footprint.
    fn set_resource_allocation(&mut self, granted: ResourceQuantity) -> ResourceQuantity {
        granted
    }

    /// `restart` is true when the result set must be produced again after a
    /// previous open/close cycle.
    fn open(&mut self, ctx: &mut OpenContext<'_>, restart: bool) -> Result<(), OpError>;

    fn execute(
        &mut self,
        ctx: &mut StreamContext<'_>,
        quantum: &Quantum,
    ) -> Result<ExecResult, OpError>;

    /// Release everything. The graph guarantees at most one call per open.
    fn close(&mut self) {}

    fn may_block(&self) -> bool {
        false
    }

    /// Who supplies the memory of this stream's output buffers.
    fn output_buf_provision(&self) -> BufProvision {
        BufProvision::Consumer
    }

    /// Who this stream expects to supply the memory of its input buffers.
    fn input_buf_requirement(&self) -> BufProvision {
        BufProvision::Producer
    }

    fn dynamic_params_read(&self) -> Vec<DynamicParamId> {
        Vec::new()
    }

    fn dynamic_params_written(&self) -> Vec<DynamicParamId> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantum_never_drops_to_zero() {
        assert_eq!(Quantum::tuples(0).max_tuples, 1);
        assert!(Quantum::default().is_unbounded());
        assert!(!Quantum::tuples(3).is_unbounded());
    }
}
