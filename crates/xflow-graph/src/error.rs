use thiserror::Error;

use xflow_operators::OpError;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph description error: {0}")]
    Plan(String),

    #[error("duplicate stream '{0}'")]
    DuplicateStream(String),

    #[error("unknown stream '{0}'")]
    UnknownStream(String),

    #[error("cycle through streams: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("{stream}: has {consumers} consumers; this scheduler only runs trees")]
    NotATree { stream: String, consumers: usize },

    #[error("{stream}: output #{ordinal} was never given a tuple shape")]
    MissingOutputShape { stream: String, ordinal: usize },

    #[error("{stream}: {phase} failed: {source}")]
    Stream {
        stream: String,
        phase: &'static str,
        #[source]
        source: OpError,
    },

    #[error("invalid graph state: {0}")]
    State(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] xflow_core::error::Error),

    #[error(transparent)]
    Op(#[from] OpError),
}

impl GraphError {
    /// True if a stream gave up because the statement was aborted.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            GraphError::Stream {
                source: OpError::Aborted,
                ..
            } | GraphError::Op(OpError::Aborted)
        )
    }
}
