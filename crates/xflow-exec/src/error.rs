use thiserror::Error;

use xflow_core::error::Error as CoreError;
use xflow_graph::GraphError;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Graph(GraphError),

    /// The governor could not meet the graph's minimum.
    #[error("resources: {0}")]
    Resource(CoreError),

    #[error(transparent)]
    Core(CoreError),

    #[error("memory: {0}")]
    Mem(xflow_mem::Error),

    /// A stream or caller broke the scheduling protocol.
    #[error("scheduler contract violated: {0}")]
    Contract(String),

    #[error("statement aborted")]
    Aborted,

    #[error("not supported by this scheduler: {0}")]
    Unsupported(String),
}

impl From<GraphError> for ExecError {
    fn from(e: GraphError) -> Self {
        if e.is_abort() {
            ExecError::Aborted
        } else {
            ExecError::Graph(e)
        }
    }
}

impl From<CoreError> for ExecError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::OutOfResources { .. } | CoreError::OutOfThreads { .. } => {
                ExecError::Resource(e)
            }
            other => ExecError::Core(other),
        }
    }
}

impl From<xflow_mem::Error> for ExecError {
    fn from(e: xflow_mem::Error) -> Self {
        match e {
            xflow_mem::Error::Core(core) => core.into(),
            other => ExecError::Mem(other),
        }
    }
}
