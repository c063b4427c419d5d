//! Unordered description of a stream graph, as handed to the graph builder.
//!
//! This is the serialized form; `xflow-graph` turns it into an `ExecGraph`
//! with the three-pass protocol.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::config::EngineConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDef {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl StreamDef {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataflowDef {
    pub source: String,
    pub target: String,
    /// Ordering-only edge: no buffer is created for it.
    #[serde(default)]
    pub implicit: bool,
}

impl DataflowDef {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            implicit: false,
        }
    }

    pub fn implicit(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            implicit: true,
            ..Self::new(source, target)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    #[serde(default)]
    pub config: Option<EngineConfig>,
    /// Stream whose output the caller reads. Defaults to the only stream
    /// without a consumer.
    #[serde(default)]
    pub root: Option<String>,
    pub streams: Vec<StreamDef>,
    #[serde(default)]
    pub dataflows: Vec<DataflowDef>,
}

impl GraphDef {
    /// Names are unique and every dataflow references a declared stream.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for s in &self.streams {
            if s.name.is_empty() {
                return Err(Error::Plan("stream with empty name".into()));
            }
            if s.name.contains('#') {
                return Err(Error::Plan(format!(
                    "stream name '{}' uses the reserved '#' character",
                    s.name
                )));
            }
            if !names.insert(s.name.as_str()) {
                return Err(Error::Plan(format!("duplicate stream '{}'", s.name)));
            }
        }
        for d in &self.dataflows {
            for end in [&d.source, &d.target] {
                if !names.contains(end.as_str()) {
                    return Err(Error::Plan(format!(
                        "dataflow {} -> {} references unknown stream '{}'",
                        d.source, d.target, end
                    )));
                }
            }
            if d.source == d.target {
                return Err(Error::Plan(format!("self-loop on '{}'", d.source)));
            }
        }
        if let Some(root) = &self.root {
            if !names.contains(root.as_str()) {
                return Err(Error::Plan(format!("root '{root}' is not a stream")));
            }
        }
        Ok(())
    }

    /// Number of buffered (non-implicit) outputs declared for each stream.
    pub fn output_counts(&self) -> HashMap<&str, usize> {
        let mut counts = HashMap::new();
        for d in self.dataflows.iter().filter(|d| !d.implicit) {
            *counts.entry(d.source.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// The declared root, or the single stream that feeds nobody.
    pub fn resolve_root(&self) -> Result<&str> {
        if let Some(root) = &self.root {
            return Ok(root.as_str());
        }
        let counts = self.output_counts();
        let sinks: Vec<&str> = self
            .streams
            .iter()
            .map(|s| s.name.as_str())
            .filter(|n| !counts.contains_key(n))
            .collect();
        match sinks.as_slice() {
            [only] => Ok(*only),
            [] => Err(Error::Plan("graph has no stream without consumers".into())),
            many => Err(Error::Plan(format!(
                "ambiguous root, candidates: {}",
                many.join(", ")
            ))),
        }
    }
}
