//! Sinks for telemetry counters and per-row soft errors.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::tuple::Tuple;

/// Receives cumulative counters, e.g. from `ResourceGovernor::write_stats`.
pub trait StatsTarget {
    fn write_counter(&mut self, name: &str, value: i64);
}

/// In-memory stats sink, mostly for tests and the CLI.
#[derive(Debug, Default, Clone)]
pub struct MapStatsTarget {
    pub counters: BTreeMap<String, i64>,
}

impl MapStatsTarget {
    pub fn get(&self, name: &str) -> Option<i64> {
        self.counters.get(name).copied()
    }
}

impl StatsTarget for MapStatsTarget {
    fn write_counter(&mut self, name: &str, value: i64) {
        self.counters.insert(name.to_string(), value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Warning,
    Error,
}

/// One soft error posted by a stream, with the row that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub source: String,
    pub level: ErrorLevel,
    pub message: String,
    pub row: Option<Tuple>,
}

/// External sink for rows diverted from the main dataflow.
///
/// Shared by every stream of a graph, so it takes `&self`.
pub trait ErrorTarget: Send + Sync {
    fn notify_error(&self, record: ErrorRecord);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullErrorTarget;

impl ErrorTarget for NullErrorTarget {
    fn notify_error(&self, _record: ErrorRecord) {}
}

/// Keeps every record in arrival order.
#[derive(Debug, Default)]
pub struct CollectingErrorTarget {
    records: Mutex<Vec<ErrorRecord>>,
}

impl CollectingErrorTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorTarget for CollectingErrorTarget {
    fn notify_error(&self, record: ErrorRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }
}
