//! Summary emitted after a statement ran to completion.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(pub Uuid);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: ReportId,

    /// Hash of the graph description the statement was built from.
    pub graph_hash: Hash256,

    pub engine_version: String,

    /// Streams in the prepared graph, adapters included.
    pub streams: usize,

    /// Rows read from the root buffer.
    pub rows: u64,

    /// Cache pages the governor granted to the graph.
    pub pages_granted: u32,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,
}

impl RunReport {
    pub fn new(graph_hash: Hash256, started_ms: u64) -> Self {
        Self {
            id: ReportId(Uuid::new_v4()),
            graph_hash,
            engine_version: crate::VERSION.to_string(),
            streams: 0,
            rows: 0,
            pages_granted: 0,
            started_ms,
            finished_ms: started_ms,
        }
    }

    pub fn finish(mut self, finished_ms: u64, rows: u64) -> Self {
        self.finished_ms = finished_ms;
        self.rows = rows;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_ms.saturating_sub(self.started_ms)
    }
}
