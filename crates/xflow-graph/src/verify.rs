//! Debug-time verification helpers for prepared graphs.
//!
//! Meant for tests and debug builds; they panic with the offending stream's
//! name instead of returning errors.

use std::collections::HashSet;

use xflow_core::id::{BufferId, StreamId};

use crate::graph::ExecGraph;

/// Every dependency (buffered or implicit) is sorted before its dependent.
pub fn assert_topological(graph: &ExecGraph) {
    let sorted = graph.sorted_streams();
    assert_eq!(
        sorted.len(),
        graph.stream_count(),
        "graph is not prepared: {} of {} streams sorted",
        sorted.len(),
        graph.stream_count()
    );
    let mut position = vec![usize::MAX; graph.stream_count()];
    for (pos, id) in sorted.iter().enumerate() {
        position[id.index()] = pos;
    }
    for (s, t) in graph.dependency_edges() {
        assert!(
            position[s] < position[t],
            "{} is sorted after its dependent {}",
            graph.stream_name(StreamId::new(s as u64)),
            graph.stream_name(StreamId::new(t as u64))
        );
    }
}

/// Each stream has at most one consumer and no stream is reached twice
/// walking down from the graph outputs.
pub fn assert_tree(graph: &ExecGraph) {
    for id in graph.stream_ids() {
        assert!(
            graph.output_count(id) <= 1,
            "{} has {} consumers",
            graph.stream_name(id),
            graph.output_count(id)
        );
    }
    let mut seen = HashSet::new();
    let mut stack: Vec<StreamId> = graph
        .stream_ids()
        .filter(|&id| graph.output_stream(id, 0).is_none())
        .collect();
    while let Some(id) = stack.pop() {
        assert!(seen.insert(id), "{} is reachable twice", graph.stream_name(id));
        stack.extend((0..graph.input_count(id)).filter_map(|k| graph.input_stream(id, k)));
    }
}

/// Every dataflow carries a tuple shape.
pub fn assert_shaped(graph: &ExecGraph) {
    for b in 0..graph.buffer_count() {
        let buffer = BufferId::new(b as u64);
        assert!(
            graph.buffer_desc(buffer).is_some(),
            "dataflow {} -> {} has no tuple shape",
            graph
                .producer_of(buffer)
                .map_or("<input>", |s| graph.stream_name(s)),
            graph
                .consumer_of(buffer)
                .map_or("<output>", |s| graph.stream_name(s))
        );
    }
}
