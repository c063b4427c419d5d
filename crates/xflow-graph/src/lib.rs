#![forbid(unsafe_code)]
//! xflow-graph: execution graphs and how they are assembled.
//!
//! - `ExecGraph` owns every stream and every buffer of one statement in
//!   arenas; streams and buffers refer to each other by id only.
//! - `GraphEmbryo` turns an unordered `GraphDef` into a prepared graph with
//!   the three-pass protocol, splicing provisioning adapters where a
//!   producer and its consumer disagree on who owns buffer memory.
//! - `yaml` reads graph descriptions; `dot` renders them for humans.

pub mod dot;
pub mod embryo;
pub mod error;
pub mod graph;
pub mod topology;
pub mod verify;
pub mod yaml;

pub use embryo::GraphEmbryo;
pub use error::{GraphError, Result};
pub use graph::{ExecGraph, GraphOptions};
