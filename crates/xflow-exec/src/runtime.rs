//! Runtime: run one graph description as a statement and emit a RunReport.
//!
//! Sequence per statement:
//! - build the graph with the three-pass embryo and prepare it
//! - acquire the graph's grant from the governor (held by a `GrantLease`)
//! - bind to a fresh `DfsTreeScheduler`, open, read the root until EOS
//! - close every stream and return the grant, whatever happened before

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use xflow_core::abort::AbortFlag;
use xflow_core::config::EngineConfig;
use xflow_core::dynamic::DynamicParamManager;
use xflow_core::hash::hash_serde;
use xflow_core::plan::GraphDef;
use xflow_core::report::RunReport;
use xflow_core::resource::ResourceGovernor;
use xflow_core::target::{ErrorTarget, NullErrorTarget};
use xflow_core::tuple::Tuple;
use xflow_graph::{ExecGraph, GraphEmbryo, GraphOptions};
use xflow_mem::{GrantLease, PagePool, SimpleGovernor};
use xflow_operators::{BufState, StreamRegistry};

use crate::error::Result;
#[cfg(feature = "tracing")]
use crate::metrics;
use crate::scheduler::{DfsTreeScheduler, Scheduler, SchedulerConfig};

/// Rows read from the root plus the report of the run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub rows: Vec<Tuple>,
    pub report: RunReport,
}

/// Engine owns the governor, the page pool, the stream registry and the
/// dynamic parameters shared by every statement it runs.
pub struct Engine {
    cfg: EngineConfig,
    governor: Arc<SimpleGovernor>,
    pool: PagePool,
    registry: StreamRegistry,
    params: DynamicParamManager,
    errors: Arc<dyn ErrorTarget>,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Result<Self> {
        cfg.validate()?;
        let governor = SimpleGovernor::new(cfg.knobs(), cfg.availability())?;
        let pool = PagePool::new(cfg.cache_pages as usize, cfg.page_size_bytes);
        Ok(Self {
            cfg,
            governor: Arc::new(governor),
            pool,
            registry: StreamRegistry::with_builtins(),
            params: DynamicParamManager::new(),
            errors: Arc::new(NullErrorTarget),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn governor(&self) -> &Arc<SimpleGovernor> {
        &self.governor
    }

    pub fn pool(&self) -> &PagePool {
        &self.pool
    }

    pub fn params(&self) -> &DynamicParamManager {
        &self.params
    }

    /// Register extra stream kinds before building graphs.
    pub fn registry_mut(&mut self) -> &mut StreamRegistry {
        &mut self.registry
    }

    /// Where streams post per-row errors (unique violations and the like).
    pub fn set_error_target(&mut self, errors: Arc<dyn ErrorTarget>) {
        self.errors = errors;
    }

    /// Per-statement settings: a `config` block in the description wins
    /// over the engine's own for quantum, quotas and trace prefix. Pool and
    /// governor sizes stay the engine's.
    fn statement_config<'a>(&'a self, def: &'a GraphDef) -> &'a EngineConfig {
        def.config.as_ref().unwrap_or(&self.cfg)
    }

    /// Build and prepare `def` without running it.
    pub fn build(&self, def: &GraphDef) -> Result<ExecGraph> {
        let cfg = self.statement_config(def);
        cfg.validate()?;
        let options = GraphOptions {
            enforce_quotas: cfg.enforce_quotas,
            trace_prefix: cfg.trace_prefix.clone(),
            ..GraphOptions::default()
        };
        let mut embryo = GraphEmbryo::from_def(
            def,
            self.registry.clone(),
            self.pool.clone(),
            self.params.clone(),
            options,
        )?;
        embryo.set_error_target(Arc::clone(&self.errors));
        Ok(embryo.prepare_graph()?)
    }

    pub fn run(&self, def: &GraphDef) -> Result<RunOutput> {
        self.run_with_abort(def, &AbortFlag::new())
    }

    /// Run `def`; setting `abort` from another thread stops the statement
    /// with `ExecError::Aborted` after its current step.
    pub fn run_with_abort(&self, def: &GraphDef, abort: &AbortFlag) -> Result<RunOutput> {
        let started = now_millis();
        let graph_hash = hash_serde(def)?;
        let root = def.resolve_root()?.to_string();
        let quantum_tuples = self.statement_config(def).quantum_tuples;

        let mut graph = self.build(def)?;
        let mut report = RunReport::new(graph_hash, started);
        report.streams = graph.stream_count();

        let governor: Arc<dyn ResourceGovernor> = self.governor.clone();
        let lease = GrantLease::acquire(governor, &mut graph)?;
        report.pages_granted = self
            .governor
            .grant_for(lease.graph())
            .map_or(0, |q| q.cache_pages);

        let mut scheduler =
            DfsTreeScheduler::with_abort(SchedulerConfig { quantum_tuples }, abort.clone());
        let result = Self::drive(&mut scheduler, &mut graph, &root);

        scheduler.stop();
        scheduler.remove_graph(&graph);
        graph.close();
        drop(lease);

        let rows = result?;
        let report = report.finish(now_millis(), rows.len() as u64);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            graph = %graph.id(),
            rows = report.rows,
            pages = report.pages_granted,
            ms = report.duration_ms(),
            "statement finished"
        );
        #[cfg(feature = "tracing")]
        metrics::emit_span(
            "engine.run",
            &[
                ("graph", graph.id().to_string()),
                ("rows", report.rows.to_string()),
            ],
        );
        Ok(RunOutput { rows, report })
    }

    fn drive(scheduler: &mut DfsTreeScheduler, graph: &mut ExecGraph, root: &str) -> Result<Vec<Tuple>> {
        scheduler.add_graph(graph)?;
        scheduler.start()?;
        graph.open()?;
        let mut rows = Vec::new();
        loop {
            let buf = scheduler.read_stream(graph, root)?;
            if buf.state() == BufState::Eos {
                return Ok(rows);
            }
            rows.extend(buf.consume_all());
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cfg", &self.cfg)
            .field("registry", &self.registry)
            .finish()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use serde_json::json;
    use xflow_core::tuple::Datum;

    fn cfg(pages: u32) -> EngineConfig {
        EngineConfig {
            cache_pages: pages,
            cache_reserve_percentage: 0,
            expected_concurrent_statements: 1,
            ..EngineConfig::default()
        }
    }

    fn def(v: serde_json::Value) -> GraphDef {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn runs_a_filtered_pipeline() {
        let engine = Engine::new(cfg(64)).unwrap();
        let out = engine
            .run(&def(json!({
                "streams": [
                    {"name": "src", "kind": "values", "params": {"count": 20}},
                    {"name": "small", "kind": "filter", "params": {"column": "n", "op": "<", "value": 5}}
                ],
                "dataflows": [{"source": "src", "target": "small"}]
            })))
            .unwrap();
        let got: Vec<i64> = out.rows.iter().filter_map(|t| t.get(0)?.as_i64()).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        assert_eq!(out.report.rows, 5);
        // src, small and the hold adapter that owns the root's output
        assert_eq!(out.report.streams, 3);
        assert_eq!(out.report.pages_granted, 1);
        assert_eq!(engine.governor().resources_assigned().cache_pages, 0);
        assert_eq!(engine.pool().used_pages(), 0);
    }

    #[test]
    fn out_of_resources_leaves_nothing_granted() {
        let engine = Engine::new(cfg(20)).unwrap();
        let err = engine
            .run(&def(json!({
                "streams": [
                    {"name": "a", "kind": "mock_resource", "params": {"min": 10, "opt": 20}},
                    {"name": "b", "kind": "mock_resource", "params": {"min": 10, "opt": 20}},
                    {"name": "c", "kind": "mock_resource", "params": {"min": 10, "opt": 20}},
                    {"name": "sink", "kind": "barrier"}
                ],
                "dataflows": [
                    {"source": "a", "target": "sink"},
                    {"source": "b", "target": "sink"},
                    {"source": "c", "target": "sink"}
                ]
            })))
            .unwrap_err();
        assert!(matches!(err, ExecError::Resource(_)), "{err}");
        assert_eq!(engine.governor().resources_assigned().cache_pages, 0);
        assert_eq!(engine.governor().active_graphs(), 0);
    }

    #[test]
    fn statement_config_overrides_quantum() {
        let engine = Engine::new(cfg(16)).unwrap();
        let out = engine
            .run(&def(json!({
                "config": {"quantum_tuples": 2},
                "streams": [{"name": "src", "kind": "values", "params": {"count": 7}}]
            })))
            .unwrap();
        assert_eq!(out.rows.len(), 7);
        assert_eq!(out.rows[6], Tuple::new(vec![Datum::Int64(6)]));
    }

    #[test]
    fn aborted_statement_returns_resources() {
        let engine = Engine::new(cfg(16)).unwrap();
        let abort = AbortFlag::new();
        abort.abort();
        let err = engine
            .run_with_abort(
                &def(json!({"streams": [{"name": "src", "kind": "values", "params": {"count": 3}}]})),
                &abort,
            )
            .unwrap_err();
        assert!(matches!(err, ExecError::Aborted));
        assert_eq!(engine.governor().resources_assigned().cache_pages, 0);
    }
}
