//! Three-pass assembly of an `ExecGraph` from an unordered description.
//!
//! 1. every stream is instantiated and registered under its name
//! 2. dataflows whose source has a single output are wired
//! 3. dataflows out of multi-output sources are wired in declaration order
//!
//! Wiring compares the producer's output provisioning with the consumer's
//! input requirement and splices a `<name>#<ordinal>.provisioner` adapter
//! when they disagree.

use std::collections::HashMap;
use std::sync::Arc;

use xflow_core::dynamic::DynamicParamManager;
use xflow_core::id::StreamId;
use xflow_core::plan::{DataflowDef, GraphDef, StreamDef};
use xflow_core::target::ErrorTarget;
use xflow_mem::PagePool;
use xflow_operators::adapter::{adapter_kind, new_adapter};
use xflow_operators::{BufProvision, StreamRegistry};

use crate::error::{GraphError, Result};
use crate::graph::{ExecGraph, GraphOptions};

pub struct GraphEmbryo {
    graph: ExecGraph,
    registry: StreamRegistry,
    /// Declared output count per stream, known once every dataflow is seen.
    declared_outputs: HashMap<String, usize>,
    next_ordinal: HashMap<String, usize>,
    deferred: Vec<DataflowDef>,
}

impl GraphEmbryo {
    pub fn new(
        registry: StreamRegistry,
        pool: PagePool,
        params: DynamicParamManager,
        options: GraphOptions,
    ) -> Self {
        Self {
            graph: ExecGraph::new(pool, params, options),
            registry,
            declared_outputs: HashMap::new(),
            next_ordinal: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    pub fn set_error_target(&mut self, errors: Arc<dyn ErrorTarget>) {
        self.graph.set_error_target(errors);
    }

    pub fn graph(&self) -> &ExecGraph {
        &self.graph
    }

    /// Run all three passes over `def` and attach the graph output of its
    /// root.
    pub fn from_def(
        def: &GraphDef,
        registry: StreamRegistry,
        pool: PagePool,
        params: DynamicParamManager,
        options: GraphOptions,
    ) -> Result<Self> {
        def.validate()?;
        let mut embryo = Self::new(registry, pool, params, options);
        embryo.declared_outputs = def
            .output_counts()
            .into_iter()
            .map(|(name, n)| (name.to_string(), n))
            .collect();

        for s in &def.streams {
            embryo.add_stream(s)?;
        }
        for d in &def.dataflows {
            embryo.add_dataflow(&d.source, &d.target, d.implicit)?;
        }
        embryo.wire_deferred()?;
        embryo.add_graph_output(def.resolve_root()?)?;
        Ok(embryo)
    }

    /// Pass 1.
    pub fn add_stream(&mut self, def: &StreamDef) -> Result<StreamId> {
        let stream = self
            .registry
            .create(&def.kind, &def.params)
            .map_err(|source| GraphError::Stream {
                stream: def.name.clone(),
                phase: "create",
                source,
            })?;
        self.graph.add_stream(def.name.clone(), stream)
    }

    /// Pass 2: wired now if `source` has one output, otherwise deferred to
    /// `wire_deferred`.
    pub fn add_dataflow(&mut self, source: &str, target: &str, implicit: bool) -> Result<()> {
        if implicit {
            let s = self.lookup(source)?;
            let t = self.lookup(target)?;
            return self.graph.add_implicit(s, t);
        }
        let outputs = self.declared_outputs.get(source).copied().unwrap_or(1);
        if outputs > 1 {
            self.deferred.push(DataflowDef::new(source, target));
            return Ok(());
        }
        self.connect(source, target)
    }

    /// Pass 3.
    pub fn wire_deferred(&mut self) -> Result<()> {
        let deferred = std::mem::take(&mut self.deferred);
        for d in deferred {
            self.connect(&d.source, &d.target)?;
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<StreamId> {
        self.graph
            .find_stream(name)
            .ok_or_else(|| GraphError::UnknownStream(name.to_string()))
    }

    fn take_ordinal(&mut self, source: &str) -> usize {
        let next = self.next_ordinal.entry(source.to_string()).or_insert(0);
        let ordinal = *next;
        *next += 1;
        ordinal
    }

    fn connect(&mut self, source: &str, target: &str) -> Result<()> {
        let t = self.lookup(target)?;
        let ordinal = self.take_ordinal(source);
        let required = self.graph.stream(t).input_buf_requirement();
        self.add_adapter_for(source, ordinal, required)?;
        let last = self
            .graph
            .find_last_stream(source, ordinal)
            .ok_or_else(|| GraphError::UnknownStream(source.to_string()))?;
        self.graph.add_dataflow(last, t)?;
        Ok(())
    }

    /// Make output `ordinal` of `name` deliver `required` provisioning.
    ///
    /// Returns the new adapter, or `None` when the current end of the chain
    /// already matches (including when this adapter was added before).
    pub fn add_adapter_for(&mut self, name: &str, ordinal: usize, required: BufProvision) -> Result<Option<StreamId>> {
        let last = self
            .graph
            .find_last_stream(name, ordinal)
            .ok_or_else(|| GraphError::UnknownStream(name.to_string()))?;
        let provided = self.graph.stream(last).output_buf_provision();
        let Some(kind) = adapter_kind(provided, required) else {
            return Ok(None);
        };
        let adapter_name = format!("{name}#{ordinal}.provisioner");
        let adapter = new_adapter(kind)
            .ok_or_else(|| GraphError::Plan(format!("no adapter of kind '{kind}'")))?;
        let id = self.graph.add_adapter_stream(adapter_name, adapter)?;
        self.graph.interpose_stream(name, ordinal, id)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(stream = name, ordinal, adapter = kind, "adapter spliced");
        Ok(Some(id))
    }

    /// Expose `name`'s next output to the caller, as producer-owned memory.
    pub fn add_graph_output(&mut self, name: &str) -> Result<StreamId> {
        self.lookup(name)?;
        let ordinal = self.take_ordinal(name);
        self.add_adapter_for(name, ordinal, BufProvision::Producer)?;
        let last = self
            .graph
            .find_last_stream(name, ordinal)
            .ok_or_else(|| GraphError::UnknownStream(name.to_string()))?;
        self.graph.add_output_dataflow(last)?;
        self.graph.register_graph_output(name, last);
        Ok(last)
    }

    /// Finalize: sort and prepare every stream.
    pub fn prepare_graph(mut self) -> Result<ExecGraph> {
        if !self.deferred.is_empty() {
            self.wire_deferred()?;
        }
        self.graph.prepare()?;
        Ok(self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn embryo() -> GraphEmbryo {
        GraphEmbryo::new(
            StreamRegistry::with_builtins(),
            PagePool::new(16, 4096),
            DynamicParamManager::new(),
            GraphOptions::default(),
        )
    }

    #[test]
    fn copy_adapter_between_producer_and_region_owner() {
        let mut e = embryo();
        e.add_stream(&StreamDef::new("A", "values", json!({"count": 10}))).unwrap();
        e.add_stream(&StreamDef::new("B", "forward", json!({"input": "consumer"}))).unwrap();
        e.add_dataflow("A", "B", false).unwrap();
        let adapter = e.graph().find_stream("A#0.provisioner").unwrap();
        assert_eq!(e.graph().stream(adapter).kind(), "copy");
        assert_eq!(e.graph().find_last_stream("A", 0), Some(adapter));
        assert!(e.graph().is_adapter(adapter));
    }

    #[test]
    fn adapter_insertion_is_idempotent() {
        let mut e = embryo();
        e.add_stream(&StreamDef::new("A", "values", json!({"count": 1}))).unwrap();
        assert_eq!(e.add_adapter_for("A", 0, BufProvision::Producer).unwrap(), None);
        let first = e.add_adapter_for("A", 0, BufProvision::Consumer).unwrap();
        assert!(first.is_some());
        let count = e.graph().stream_count();
        assert_eq!(e.add_adapter_for("A", 0, BufProvision::Consumer).unwrap(), None);
        assert_eq!(e.graph().stream_count(), count);
    }

    #[test]
    fn multi_output_sources_are_wired_last_in_order() {
        let def: GraphDef = serde_json::from_value(json!({
            "streams": [
                {"name": "src", "kind": "values", "params": {"count": 4}},
                {"name": "split", "kind": "splitter"},
                {"name": "left", "kind": "forward"},
                {"name": "right", "kind": "forward"},
                {"name": "other", "kind": "values", "params": {"count": 2}},
                {"name": "sink", "kind": "barrier"}
            ],
            "dataflows": [
                {"source": "src", "target": "split"},
                {"source": "split", "target": "left"},
                {"source": "split", "target": "right"},
                {"source": "left", "target": "sink"},
                {"source": "right", "target": "sink"},
                {"source": "other", "target": "sink"}
            ]
        }))
        .unwrap();
        let e = GraphEmbryo::from_def(
            &def,
            StreamRegistry::with_builtins(),
            PagePool::new(16, 4096),
            DynamicParamManager::new(),
            GraphOptions::default(),
        )
        .unwrap();
        let g = e.prepare_graph().unwrap();
        let split = g.find_stream("split").unwrap();
        assert_eq!(g.output_stream(split, 0), g.find_stream("left"));
        assert_eq!(g.output_stream(split, 1), g.find_stream("right"));
        let sink = g.find_stream("sink").unwrap();
        assert_eq!(g.input_count(sink), 3);
        assert_eq!(g.input_stream(sink, 2), g.find_stream("other"));
        assert!(g.find_stream("left#0.provisioner").is_none());
        // its own output is consumer-provisioned, so the root gets a hold adapter
        let out = g.resolve_output("sink").unwrap();
        assert_eq!(g.stream_name(out), "sink#0.provisioner");
        assert!(g.verify_tree().is_err());
    }
}
