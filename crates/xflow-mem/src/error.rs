use thiserror::Error;

/// Result type local to xflow-mem.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("stream '{stream}' exceeded its quota of {quota} pages")]
    QuotaExceeded { stream: String, quota: usize },

    #[error("page pool exhausted: all {capacity} pages in use")]
    PoolExhausted { capacity: usize },

    #[error(transparent)]
    Core(#[from] xflow_core::error::Error),
}
