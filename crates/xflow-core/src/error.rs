use thiserror::Error;

use crate::id::{DynamicParamId, GraphId};

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Graph description error: {0}")]
    Plan(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Value error: {0}")]
    Value(String),

    /// The governor could not satisfy the summed minimum of a graph.
    #[error("{graph}: out of resources, required {required} cache pages but only {available} available")]
    OutOfResources {
        graph: GraphId,
        required: u64,
        available: u64,
    },

    #[error("{graph}: requires {required} threads but only {available} available")]
    OutOfThreads {
        graph: GraphId,
        required: u64,
        available: u64,
    },

    #[error("dynamic parameter {0} already exists")]
    DuplicateParam(DynamicParamId),

    #[error("dynamic parameter {0} does not exist")]
    MissingParam(DynamicParamId),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
