//! The execution graph: streams, dataflows and buffers in arenas.
//!
//! Every dataflow `i` is materialized as buffer `i` once the graph is bound
//! to a scheduler. A dataflow with no source is a graph-level input; one with
//! no target is a graph-level output read by the caller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use xflow_core::abort::AbortFlag;
use xflow_core::dynamic::DynamicParamManager;
use xflow_core::id::{BufferId, GraphId, StreamId};
use xflow_core::resource::{ResourceDemand, ResourceQuantity, StreamRequirement};
use xflow_core::target::{ErrorTarget, NullErrorTarget};
use xflow_core::tuple::TupleDesc;
use xflow_mem::{PagePool, QuotaPageAccessor};
use xflow_operators::{
    BufAccessor, BufProvision, ExecResult, ExecStream, OpenContext, PrepareContext, Quantum,
    StreamContext,
};

use crate::error::{GraphError, Result};
use crate::topology;

/// Knobs fixed when the graph is created.
#[derive(Debug, Clone)]
pub struct GraphOptions {
    pub enforce_quotas: bool,
    /// Close producers first instead of consumers first.
    pub close_in_dataflow_order: bool,
    /// Keep the state history of every buffer (tests, debugging).
    pub record_buffer_history: bool,
    pub trace_prefix: String,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            enforce_quotas: true,
            close_in_dataflow_order: false,
            record_buffer_history: false,
            trace_prefix: "xflow".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Added,
    Prepared,
    Open,
    Closed,
}

struct StreamSlot {
    name: String,
    stream: Box<dyn ExecStream>,
    inputs: Vec<BufferId>,
    outputs: Vec<BufferId>,
    scratch: QuotaPageAccessor,
    allocation: Option<ResourceQuantity>,
    adapter: bool,
    state: Lifecycle,
    executions: u64,
}

#[derive(Debug, Clone)]
struct Dataflow {
    source: Option<StreamId>,
    target: Option<StreamId>,
    desc: Option<TupleDesc>,
}

pub struct ExecGraph {
    id: GraphId,
    options: GraphOptions,
    slots: Vec<StreamSlot>,
    dataflows: Vec<Dataflow>,
    buffers: Vec<BufAccessor>,
    implicit: Vec<(StreamId, StreamId)>,
    names: HashMap<String, StreamId>,
    /// (original stream, output ordinal) -> last adapter spliced after it
    out_map: HashMap<(String, usize), StreamId>,
    /// graph output name -> stream whose output the caller reads
    graph_outputs: HashMap<String, StreamId>,
    sorted: Vec<StreamId>,
    prepared: bool,
    bound: bool,
    open: bool,
    ever_opened: bool,
    pool: PagePool,
    params: DynamicParamManager,
    errors: Arc<dyn ErrorTarget>,
}

impl ExecGraph {
    pub fn new(pool: PagePool, params: DynamicParamManager, options: GraphOptions) -> Self {
        Self {
            id: GraphId::next(),
            options,
            slots: Vec::new(),
            dataflows: Vec::new(),
            buffers: Vec::new(),
            implicit: Vec::new(),
            names: HashMap::new(),
            out_map: HashMap::new(),
            graph_outputs: HashMap::new(),
            sorted: Vec::new(),
            prepared: false,
            bound: false,
            open: false,
            ever_opened: false,
            pool,
            params,
            errors: Arc::new(NullErrorTarget),
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    pub fn set_error_target(&mut self, errors: Arc<dyn ErrorTarget>) {
        self.errors = errors;
    }

    pub fn params(&self) -> &DynamicParamManager {
        &self.params
    }

    pub fn pool(&self) -> &PagePool {
        &self.pool
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.prepared {
            return Err(GraphError::State(
                "streams and dataflows are fixed once the graph is prepared".into(),
            ));
        }
        Ok(())
    }

    fn slot(&self, id: StreamId) -> Result<&StreamSlot> {
        self.slots
            .get(id.index())
            .ok_or_else(|| GraphError::UnknownStream(id.to_string()))
    }

    // ----- construction -----

    pub fn add_stream(&mut self, name: impl Into<String>, stream: Box<dyn ExecStream>) -> Result<StreamId> {
        self.add_slot(name.into(), stream, false)
    }

    pub(crate) fn add_adapter_stream(&mut self, name: String, stream: Box<dyn ExecStream>) -> Result<StreamId> {
        self.add_slot(name, stream, true)
    }

    fn add_slot(&mut self, name: String, stream: Box<dyn ExecStream>, adapter: bool) -> Result<StreamId> {
        self.ensure_mutable()?;
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateStream(name));
        }
        let id = StreamId::new(self.slots.len() as u64);
        let scratch = self.pool.accessor(name.clone(), self.options.enforce_quotas);
        self.names.insert(name.clone(), id);
        self.slots.push(StreamSlot {
            name,
            stream,
            inputs: Vec::new(),
            outputs: Vec::new(),
            scratch,
            allocation: None,
            adapter,
            state: Lifecycle::Added,
            executions: 0,
        });
        Ok(id)
    }

    fn push_dataflow(&mut self, source: Option<StreamId>, target: Option<StreamId>, desc: Option<TupleDesc>) -> Result<BufferId> {
        self.ensure_mutable()?;
        for end in [source, target].into_iter().flatten() {
            self.slot(end)?;
        }
        let id = BufferId::new(self.dataflows.len() as u64);
        self.dataflows.push(Dataflow {
            source,
            target,
            desc,
        });
        if let Some(s) = source {
            self.slots[s.index()].outputs.push(id);
        }
        if let Some(t) = target {
            self.slots[t.index()].inputs.push(id);
        }
        Ok(id)
    }

    /// Buffered edge; becomes the next output of `source` and the next input
    /// of `target`.
    pub fn add_dataflow(&mut self, source: StreamId, target: StreamId) -> Result<BufferId> {
        if source == target {
            return Err(GraphError::Plan(format!(
                "self-loop on '{}'",
                self.slot(source)?.name
            )));
        }
        self.push_dataflow(Some(source), Some(target), None)
    }

    /// Output of `source` read by the caller.
    pub fn add_output_dataflow(&mut self, source: StreamId) -> Result<BufferId> {
        self.push_dataflow(Some(source), None, None)
    }

    /// Input of `target` written by the caller, with its shape.
    pub fn add_input_dataflow(&mut self, target: StreamId, desc: TupleDesc) -> Result<BufferId> {
        self.push_dataflow(None, Some(target), Some(desc))
    }

    /// Ordering-only edge; no buffer.
    pub fn add_implicit(&mut self, source: StreamId, target: StreamId) -> Result<()> {
        self.ensure_mutable()?;
        self.slot(source)?;
        self.slot(target)?;
        if !self.implicit.contains(&(source, target)) {
            self.implicit.push((source, target));
        }
        Ok(())
    }

    /// Wire the current end of `name`'s output `ordinal` into `stream` and
    /// make `stream` the new end of that chain.
    pub fn interpose_stream(&mut self, name: &str, ordinal: usize, stream: StreamId) -> Result<BufferId> {
        let last = self
            .find_last_stream(name, ordinal)
            .ok_or_else(|| GraphError::UnknownStream(name.to_string()))?;
        let buffer = self.add_dataflow(last, stream)?;
        self.out_map.insert((name.to_string(), ordinal), stream);
        Ok(buffer)
    }

    pub(crate) fn register_graph_output(&mut self, name: &str, stream: StreamId) {
        self.graph_outputs.insert(name.to_string(), stream);
    }

    // ----- queries -----

    pub fn find_stream(&self, name: &str) -> Option<StreamId> {
        self.names.get(name).copied()
    }

    /// End of the adapter chain after `name`'s output `ordinal`, or `name`
    /// itself when nothing was spliced in.
    pub fn find_last_stream(&self, name: &str, ordinal: usize) -> Option<StreamId> {
        self.out_map
            .get(&(name.to_string(), ordinal))
            .copied()
            .or_else(|| self.find_stream(name))
    }

    /// Stream whose graph-level output the caller reads under `name`.
    pub fn resolve_output(&self, name: &str) -> Option<StreamId> {
        self.graph_outputs
            .get(name)
            .copied()
            .or_else(|| self.find_stream(name))
    }

    pub fn stream_count(&self) -> usize {
        self.slots.len()
    }

    pub fn stream_ids(&self) -> impl Iterator<Item = StreamId> + '_ {
        (0..self.slots.len()).map(|i| StreamId::new(i as u64))
    }

    pub fn stream_name(&self, id: StreamId) -> &str {
        &self.slots[id.index()].name
    }

    pub fn stream(&self, id: StreamId) -> &dyn ExecStream {
        self.slots[id.index()].stream.as_ref()
    }

    pub fn stream_mut(&mut self, id: StreamId) -> &mut dyn ExecStream {
        self.slots[id.index()].stream.as_mut()
    }

    pub fn trace_name(&self, id: StreamId) -> String {
        format!("{}.{}", self.options.trace_prefix, self.slots[id.index()].name)
    }

    pub fn is_adapter(&self, id: StreamId) -> bool {
        self.slots[id.index()].adapter
    }

    pub fn input_count(&self, id: StreamId) -> usize {
        self.slots[id.index()].inputs.len()
    }

    pub fn output_count(&self, id: StreamId) -> usize {
        self.slots[id.index()].outputs.len()
    }

    pub fn input_buffers(&self, id: StreamId) -> &[BufferId] {
        &self.slots[id.index()].inputs
    }

    pub fn output_buffers(&self, id: StreamId) -> &[BufferId] {
        &self.slots[id.index()].outputs
    }

    /// Producer feeding input `ordinal` of `id`.
    pub fn input_stream(&self, id: StreamId, ordinal: usize) -> Option<StreamId> {
        let buf = self.slots[id.index()].inputs.get(ordinal)?;
        self.dataflows[buf.index()].source
    }

    /// Consumer reading output `ordinal` of `id`.
    pub fn output_stream(&self, id: StreamId, ordinal: usize) -> Option<StreamId> {
        let buf = self.slots[id.index()].outputs.get(ordinal)?;
        self.dataflows[buf.index()].target
    }

    pub fn input_accessor(&self, id: StreamId, ordinal: usize) -> Option<&BufAccessor> {
        let buf = self.slots[id.index()].inputs.get(ordinal)?;
        self.buffers.get(buf.index())
    }

    pub fn output_accessor(&self, id: StreamId, ordinal: usize) -> Option<&BufAccessor> {
        let buf = self.slots[id.index()].outputs.get(ordinal)?;
        self.buffers.get(buf.index())
    }

    pub fn producer_of(&self, buffer: BufferId) -> Option<StreamId> {
        self.dataflows.get(buffer.index())?.source
    }

    pub fn consumer_of(&self, buffer: BufferId) -> Option<StreamId> {
        self.dataflows.get(buffer.index())?.target
    }

    pub fn buffer_count(&self) -> usize {
        self.dataflows.len()
    }

    pub fn buffer(&self, id: BufferId) -> &BufAccessor {
        &self.buffers[id.index()]
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> &mut BufAccessor {
        &mut self.buffers[id.index()]
    }

    pub fn buffer_desc(&self, id: BufferId) -> Option<&TupleDesc> {
        self.dataflows.get(id.index())?.desc.as_ref()
    }

    pub fn implicit_edges(&self) -> &[(StreamId, StreamId)] {
        &self.implicit
    }

    /// Streams in dependency order; empty until `prepare`.
    pub fn sorted_streams(&self) -> &[StreamId] {
        &self.sorted
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn executions(&self, id: StreamId) -> u64 {
        self.slots[id.index()].executions
    }

    pub fn allocation(&self, id: StreamId) -> Option<ResourceQuantity> {
        self.slots[id.index()].allocation
    }

    pub fn scratch(&self, id: StreamId) -> &QuotaPageAccessor {
        &self.slots[id.index()].scratch
    }

    /// Every dependency edge as index pairs: dataflows between two streams
    /// plus implicit edges.
    pub fn dependency_edges(&self) -> Vec<(usize, usize)> {
        let mut edges: Vec<(usize, usize)> = self
            .dataflows
            .iter()
            .filter_map(|d| match (d.source, d.target) {
                (Some(s), Some(t)) => Some((s.index(), t.index())),
                _ => None,
            })
            .collect();
        edges.extend(self.implicit.iter().map(|(s, t)| (s.index(), t.index())));
        edges
    }

    pub fn is_acyclic(&self) -> bool {
        topology::topological_order(self.slots.len(), &self.dependency_edges()).is_ok()
    }

    /// Each stream feeds at most one consumer (graph outputs included).
    pub fn verify_tree(&self) -> Result<()> {
        for slot in &self.slots {
            if slot.outputs.len() > 1 {
                return Err(GraphError::NotATree {
                    stream: slot.name.clone(),
                    consumers: slot.outputs.len(),
                });
            }
        }
        Ok(())
    }

    // ----- preparation -----

    /// Writer -> reader edge for every dynamic parameter two streams share.
    fn add_param_edges(&mut self) {
        let mut writers: HashMap<u64, Vec<StreamId>> = HashMap::new();
        for (i, slot) in self.slots.iter().enumerate() {
            for p in slot.stream.dynamic_params_written() {
                writers.entry(p.get()).or_default().push(StreamId::new(i as u64));
            }
        }
        let mut edges = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            let reader = StreamId::new(i as u64);
            for p in slot.stream.dynamic_params_read() {
                for &w in writers.get(&p.get()).into_iter().flatten() {
                    if w != reader {
                        edges.push((w, reader));
                    }
                }
            }
        }
        for e in edges {
            if !self.implicit.contains(&e) {
                self.implicit.push(e);
            }
        }
    }

    fn sort(&mut self) -> Result<()> {
        let order = topology::topological_order(self.slots.len(), &self.dependency_edges())
            .map_err(|stuck| {
                GraphError::Cycle(stuck.into_iter().map(|i| self.slots[i].name.clone()).collect())
            })?;
        self.sorted = order.into_iter().map(|i| StreamId::new(i as u64)).collect();
        Ok(())
    }

    /// Sort the streams and prepare each one in order, fixing every buffer's
    /// tuple shape.
    pub fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        self.add_param_edges();
        self.sort()?;

        for k in 0..self.sorted.len() {
            let id = self.sorted[k];
            let trace = self.trace_name(id);
            let slot = &mut self.slots[id.index()];

            let mut input_descs = Vec::with_capacity(slot.inputs.len());
            for (ordinal, buf) in slot.inputs.iter().enumerate() {
                let desc = self.dataflows[buf.index()].desc.clone().ok_or_else(|| {
                    GraphError::Plan(format!("{trace}: input #{ordinal} has no tuple shape"))
                })?;
                input_descs.push(desc);
            }

            let mut ctx = PrepareContext::new(&trace, &input_descs, slot.outputs.len(), &self.params);
            slot.stream.prepare(&mut ctx).map_err(|source| GraphError::Stream {
                stream: trace.clone(),
                phase: "prepare",
                source,
            })?;
            for (ordinal, desc) in ctx.into_outputs().into_iter().enumerate() {
                let desc = desc.ok_or_else(|| GraphError::MissingOutputShape {
                    stream: trace.clone(),
                    ordinal,
                })?;
                self.dataflows[slot.outputs[ordinal].index()].desc = Some(desc);
            }
            slot.state = Lifecycle::Prepared;

            #[cfg(feature = "tracing")]
            tracing::trace!(stream = %trace, kind = slot.stream.kind(), "prepared");
        }
        self.prepared = true;
        Ok(())
    }

    /// Materialize one buffer per dataflow. Provisioning follows the
    /// producer's declaration, falling back to the consumer's requirement.
    pub fn bind_buffers(&mut self) -> Result<()> {
        if !self.prepared {
            return Err(GraphError::State("bind before prepare".into()));
        }
        if self.bound {
            return Ok(());
        }
        let mut buffers = Vec::with_capacity(self.dataflows.len());
        for d in &self.dataflows {
            let produced = d
                .source
                .map(|s| self.slots[s.index()].stream.output_buf_provision())
                .unwrap_or(BufProvision::None);
            let required = d
                .target
                .map(|t| self.slots[t.index()].stream.input_buf_requirement())
                .unwrap_or(BufProvision::None);
            let provision = match (produced, required) {
                (BufProvision::None, BufProvision::None) => BufProvision::Producer,
                (BufProvision::None, r) => r,
                (p, _) => p,
            };
            let mut buf = BufAccessor::new(provision);
            if let Some(desc) = &d.desc {
                buf.set_tuple_desc(desc.clone());
            }
            if self.options.record_buffer_history {
                buf.record_history();
            }
            buffers.push(buf);
        }
        self.buffers = buffers;
        self.bound = true;
        Ok(())
    }

    // ----- resources -----

    /// Grant exactly `quantity` to `id` and tell the stream.
    pub fn set_allocation(&mut self, id: StreamId, quantity: ResourceQuantity) -> ResourceQuantity {
        let slot = &mut self.slots[id.index()];
        slot.allocation = Some(quantity);
        slot.scratch.set_quota(quantity.cache_pages as usize);
        let held = slot.stream.set_resource_allocation(quantity);

        #[cfg(feature = "tracing")]
        tracing::debug!(stream = %slot.name, granted = %quantity, held = %held, "allocation");
        held
    }

    // ----- lifecycle -----

    /// Open every stream, producers first. Buffers go back to `Empty`;
    /// streams without a grant run on their minimum.
    pub fn open(&mut self) -> Result<()> {
        if !self.prepared {
            return Err(GraphError::State("open before prepare".into()));
        }
        if self.open {
            return Ok(());
        }
        self.bind_buffers()?;
        for buf in &mut self.buffers {
            buf.clear();
        }
        for k in 0..self.sorted.len() {
            let id = self.sorted[k];
            if self.slots[id.index()].allocation.is_none() {
                let min = self.slots[id.index()].stream.resource_requirements().min;
                self.set_allocation(id, min);
            }
        }

        let restart = self.ever_opened;
        self.open = true;
        self.ever_opened = true;
        for k in 0..self.sorted.len() {
            let id = self.sorted[k];
            let trace = self.trace_name(id);
            let slot = &mut self.slots[id.index()];
            let mut ctx = OpenContext::new(&trace, &slot.scratch, &self.params);
            slot.stream
                .open(&mut ctx, restart)
                .map_err(|source| GraphError::Stream {
                    stream: trace.clone(),
                    phase: "open",
                    source,
                })?;
            slot.state = Lifecycle::Open;
            slot.executions = 0;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(graph = %self.id, restart, streams = self.slots.len(), "graph open");
        Ok(())
    }

    fn close_slot(slot: &mut StreamSlot) {
        if matches!(slot.state, Lifecycle::Prepared | Lifecycle::Open) {
            slot.stream.close();
            slot.state = Lifecycle::Closed;
        }
    }

    /// Close every stream once, consumers first unless the graph was built
    /// to close in dataflow order, then take back all scratch pages the
    /// streams still hold. Safe to call repeatedly.
    pub fn close(&mut self) {
        let mut order: Vec<StreamId> = if self.sorted.len() == self.slots.len() {
            self.sorted.clone()
        } else {
            self.stream_ids().collect()
        };
        if !self.options.close_in_dataflow_order {
            order.reverse();
        }
        for id in order {
            Self::close_slot(&mut self.slots[id.index()]);
        }
        for slot in &self.slots {
            let _reclaimed = slot.scratch.release_all();
            #[cfg(feature = "tracing")]
            {
                if _reclaimed > 0 {
                    tracing::debug!(stream = %slot.name, pages = _reclaimed, "scratch pages reclaimed on close");
                }
            }
        }
        self.open = false;
    }

    /// Close everything upstream of `id`, leaving `id` itself open.
    pub fn close_producers(&mut self, id: StreamId) {
        let upstream = topology::ancestors(self.slots.len(), &self.dependency_edges(), id.index());
        let mut order: Vec<StreamId> = self
            .sorted
            .iter()
            .copied()
            .filter(|s| upstream.contains(&s.index()))
            .collect();
        if !self.options.close_in_dataflow_order {
            order.reverse();
        }
        for s in order {
            Self::close_slot(&mut self.slots[s.index()]);
        }
    }

    pub fn is_stream_open(&self, id: StreamId) -> bool {
        self.slots[id.index()].state == Lifecycle::Open
    }

    // ----- execution -----

    /// One `execute` call on `id`.
    pub fn execute_stream(&mut self, id: StreamId, quantum: &Quantum, abort: &AbortFlag) -> Result<ExecResult> {
        let slot = self
            .slots
            .get_mut(id.index())
            .ok_or_else(|| GraphError::UnknownStream(id.to_string()))?;
        if slot.state != Lifecycle::Open {
            return Err(GraphError::State(format!(
                "{}: execute while not open",
                slot.name
            )));
        }
        slot.executions += 1;
        let mut ctx = StreamContext::new(
            &slot.name,
            &mut self.buffers,
            &slot.inputs,
            &slot.outputs,
            &self.params,
            self.errors.as_ref(),
            abort,
        );
        let result = slot
            .stream
            .execute(&mut ctx, quantum)
            .map_err(|source| GraphError::Stream {
                stream: format!("{}.{}", self.options.trace_prefix, slot.name),
                phase: "execute",
                source,
            })?;

        #[cfg(feature = "tracing")]
        tracing::trace!(stream = %slot.name, result = %result, "executed");
        Ok(result)
    }

    /// Stream names keyed for lookups in tests and reports.
    pub fn names(&self) -> HashSet<&str> {
        self.slots.iter().map(|s| s.name.as_str()).collect()
    }
}

impl ResourceDemand for ExecGraph {
    fn graph_id(&self) -> GraphId {
        self.id
    }

    fn stream_requirements(&self) -> Vec<StreamRequirement> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, s)| StreamRequirement {
                stream: StreamId::new(i as u64),
                name: s.name.clone(),
                requirements: s.stream.resource_requirements(),
            })
            .collect()
    }

    fn apply_allocation(&mut self, grants: &[(StreamId, ResourceQuantity)]) {
        for &(id, q) in grants {
            if id.index() < self.slots.len() {
                self.set_allocation(id, q);
            }
        }
    }
}

impl Drop for ExecGraph {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ExecGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecGraph")
            .field("id", &self.id)
            .field("streams", &self.slots.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("dataflows", &self.dataflows.len())
            .field("prepared", &self.prepared)
            .field("open", &self.open)
            .finish()
    }
}
