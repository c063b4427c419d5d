#![forbid(unsafe_code)]
//! xflow: a pull-based dataflow execution engine.
//!
//! This facade re-exports the workspace crates so embedders and the
//! cross-crate tests can depend on one package:
//! - `types`: ids, tuples, graph descriptions, the resource contract
//! - `mem`: page pool and the resource governor
//! - `operators`: the stream contract, buffers and built-in streams
//! - `graph`: graph assembly, preparation and lifecycle
//! - `exec`: the DFS scheduler and the statement runtime

pub use xflow_core as types;
pub use xflow_exec as exec;
pub use xflow_graph as graph;
pub use xflow_mem as mem;
pub use xflow_operators as operators;

pub use xflow_core::prelude;
pub use xflow_exec::{Engine, ExecError, RunOutput};
