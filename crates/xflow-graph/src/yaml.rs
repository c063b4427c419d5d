//! YAML graph descriptions.
//!
//! Example:
//! ```yaml
//! config: { cache_pages: 64, quantum_tuples: 128 }
//! streams:
//!   - { name: src,  kind: values, params: { count: 1000 } }
//!   - { name: even, kind: filter, params: { column: n, op: "<", value: 10 } }
//!   - { name: uniq, kind: unique, params: { column: n } }
//! chains:
//!   - [src, even, uniq]
//! ```
//!
//! `chains` is shorthand: each list expands to dataflows between consecutive
//! names, appended after the explicit `dataflows`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use xflow_core::config::EngineConfig;
use xflow_core::plan::{DataflowDef, GraphDef, StreamDef};

use crate::error::{GraphError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct GraphDoc {
    #[serde(default)]
    config: Option<EngineConfig>,
    #[serde(default)]
    root: Option<String>,
    streams: Vec<StreamDef>,
    #[serde(default)]
    dataflows: Vec<DataflowDef>,
    #[serde(default)]
    chains: Vec<Vec<String>>,
}

impl GraphDoc {
    fn into_def(self) -> Result<GraphDef> {
        let mut dataflows = self.dataflows;
        for chain in &self.chains {
            if chain.len() < 2 {
                return Err(GraphError::Plan(format!(
                    "chain {chain:?} needs at least two streams"
                )));
            }
            dataflows.extend(chain.windows(2).map(|w| DataflowDef::new(&w[0], &w[1])));
        }
        Ok(GraphDef {
            config: self.config,
            root: self.root,
            streams: self.streams,
            dataflows,
        })
    }
}

/// Parse and validate a graph description.
pub fn parse_graph(yaml_src: &str) -> Result<GraphDef> {
    let doc: GraphDoc = serde_yaml::from_str(yaml_src)?;
    let def = doc.into_def()?;
    def.validate()?;
    Ok(def)
}

pub fn load_graph(path: impl AsRef<Path>) -> Result<GraphDef> {
    let src = std::fs::read_to_string(path)?;
    parse_graph(&src)
}

/// Canonical YAML for `def` (chains already expanded).
pub fn to_yaml(def: &GraphDef) -> Result<String> {
    Ok(serde_yaml::to_string(def)?)
}
