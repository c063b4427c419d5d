//! Schedulers drive prepared graphs.
//!
//! `DfsTreeScheduler` is the reference: single-threaded and purely
//! demand-driven. A read against the root walks down to the stream that
//! actually has to run, runs it, and climbs back up as buffers fill.

use std::collections::HashSet;

use xflow_core::abort::AbortFlag;
use xflow_core::id::{GraphId, StreamId};
use xflow_graph::ExecGraph;
use xflow_operators::{BufAccessor, BufProvision, BufState, ExecResult, Quantum};

use crate::error::{ExecError, Result};
#[cfg(feature = "tracing")]
use crate::metrics;

/// What every scheduler offers to the statement layer.
pub trait Scheduler {
    /// Take `graph` under this scheduler. Buffers are bound here; after this
    /// the graph's streams and dataflows are fixed.
    fn add_graph(&mut self, graph: &mut ExecGraph) -> Result<()>;

    fn remove_graph(&mut self, graph: &ExecGraph);

    fn start(&mut self) -> Result<()>;

    /// Wake a stream that declared itself externally runnable.
    fn make_runnable(&mut self, graph: &mut ExecGraph, stream: &str) -> Result<()>;

    /// Run the graph until the root's output has data or reached EOS and
    /// hand that buffer to the caller.
    fn read_stream<'g>(&mut self, graph: &'g mut ExecGraph, root: &str) -> Result<&'g mut BufAccessor>;

    /// Push input into a graph-level input buffer.
    fn write_stream<'g>(&mut self, graph: &'g mut ExecGraph, stream: &str) -> Result<&'g mut BufAccessor>;

    /// Request cancellation; callable from any thread through a clone of the
    /// scheduler's abort flag.
    fn abort(&self);

    /// Returns once no scheduler-owned execution is running.
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Tuples per `execute`; `None` hands out an unbounded quantum.
    pub quantum_tuples: Option<u32>,
}

impl SchedulerConfig {
    pub fn quantum(&self) -> Quantum {
        self.quantum_tuples.map_or(Quantum::UNBOUNDED, Quantum::tuples)
    }
}

#[derive(Debug, Default)]
pub struct DfsTreeScheduler {
    config: SchedulerConfig,
    abort: AbortFlag,
    graphs: HashSet<GraphId>,
    running: bool,
}

impl DfsTreeScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_abort(config, AbortFlag::new())
    }

    /// Share `abort` with whoever may cancel the statement.
    pub fn with_abort(config: SchedulerConfig, abort: AbortFlag) -> Self {
        Self {
            config,
            abort,
            graphs: HashSet::new(),
            running: false,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Clone of the flag `abort()` sets.
    pub fn abort_handle(&self) -> AbortFlag {
        self.abort.clone()
    }

    fn resolve(graph: &ExecGraph, name: &str) -> Result<StreamId> {
        graph
            .resolve_output(name)
            .ok_or_else(|| ExecError::Contract(format!("no stream named '{name}'")))
    }

    /// Index of the first input of `id` waiting for production.
    fn underflowing_input(graph: &ExecGraph, id: StreamId) -> Option<usize> {
        (0..graph.input_count(id)).find(|&k| {
            graph
                .input_accessor(id, k)
                .is_some_and(|b| b.state() == BufState::Underflow)
        })
    }

    /// The walk itself. Returns when the root's output holds data or EOS.
    fn walk(&self, graph: &mut ExecGraph, root: StreamId) -> Result<u64> {
        let quantum = self.config.quantum();
        let mut current = root;
        let mut steps = 0u64;
        loop {
            if self.abort.is_aborted() {
                return Err(ExecError::Aborted);
            }

            // VISIT: descend toward the producer that has to run.
            if let Some(k) = Self::underflowing_input(graph, current) {
                current = graph.input_stream(current, k).ok_or_else(|| {
                    ExecError::Contract(format!(
                        "{}: input #{k} is fed by the caller; this scheduler has no write side",
                        graph.trace_name(current)
                    ))
                })?;
                continue;
            }

            let result = graph.execute_stream(current, &quantum, &self.abort)?;
            steps += 1;

            #[cfg(feature = "tracing")]
            tracing::trace!(stream = %graph.trace_name(current), %result, "dfs step");

            match result {
                ExecResult::Yield => {
                    return Err(ExecError::Contract(format!(
                        "{} yielded to a synchronous scheduler",
                        graph.trace_name(current)
                    )));
                }
                ExecResult::QuantumExpired => {}
                ExecResult::Overflow | ExecResult::Eos => {
                    if current == root {
                        return Ok(steps);
                    }
                    current = graph.output_stream(current, 0).ok_or_else(|| {
                        ExecError::Contract(format!(
                            "{} has no consumer but is not the root",
                            graph.trace_name(current)
                        ))
                    })?;
                }
                ExecResult::Underflow => {
                    if Self::underflowing_input(graph, current).is_none() {
                        return Err(ExecError::Contract(format!(
                            "{} reported underflow without requesting any input",
                            graph.trace_name(current)
                        )));
                    }
                }
            }
        }
    }
}

impl Scheduler for DfsTreeScheduler {
    fn add_graph(&mut self, graph: &mut ExecGraph) -> Result<()> {
        if !graph.is_prepared() {
            return Err(ExecError::Contract("graph must be prepared before scheduling".into()));
        }
        graph.verify_tree()?;
        graph.bind_buffers()?;
        self.graphs.insert(graph.id());
        Ok(())
    }

    fn remove_graph(&mut self, graph: &ExecGraph) {
        self.graphs.remove(&graph.id());
    }

    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn make_runnable(&mut self, graph: &mut ExecGraph, stream: &str) -> Result<()> {
        Err(ExecError::Unsupported(format!(
            "{}.{stream}: externally runnable streams",
            graph.options().trace_prefix
        )))
    }

    fn read_stream<'g>(&mut self, graph: &'g mut ExecGraph, root: &str) -> Result<&'g mut BufAccessor> {
        if !self.graphs.contains(&graph.id()) {
            return Err(ExecError::Contract(format!("{} was never added", graph.id())));
        }
        if !self.running {
            return Err(ExecError::Contract("read_stream before start".into()));
        }
        if !graph.is_open() {
            return Err(ExecError::Contract("read_stream on a graph that is not open".into()));
        }
        let root_id = Self::resolve(graph, root)?;
        let out = match graph.output_buffers(root_id) {
            [only] if graph.consumer_of(*only).is_none() => *only,
            _ => {
                return Err(ExecError::Contract(format!(
                    "{} is not a root: its output is not read by the caller",
                    graph.trace_name(root_id)
                )))
            }
        };
        if graph.buffer(out).provision() != BufProvision::Producer {
            return Err(ExecError::Contract(format!(
                "{}: root output must be producer-provisioned",
                graph.trace_name(root_id)
            )));
        }

        match graph.buffer(out).state() {
            BufState::Eos => return Ok(graph.buffer_mut(out)),
            BufState::NonEmpty | BufState::Overflow => {
                return Err(ExecError::Contract(format!(
                    "{}: previous result was not consumed",
                    graph.trace_name(root_id)
                )))
            }
            BufState::Empty | BufState::Underflow => graph.buffer_mut(out).request_production(),
        }

        let _steps = self.walk(graph, root_id)?;
        #[cfg(feature = "tracing")]
        metrics::emit_span(
            "dfs.read",
            &[
                ("root", graph.trace_name(root_id)),
                ("steps", _steps.to_string()),
                ("state", graph.buffer(out).state().to_string()),
            ],
        );
        Ok(graph.buffer_mut(out))
    }

    fn write_stream<'g>(&mut self, _graph: &'g mut ExecGraph, stream: &str) -> Result<&'g mut BufAccessor> {
        Err(ExecError::Unsupported(format!("write_stream('{stream}')")))
    }

    fn abort(&self) {
        self.abort.abort();
    }

    fn stop(&mut self) {
        // The walk runs on the caller's thread, so nothing is left running here.
        self.running = false;
    }
}
