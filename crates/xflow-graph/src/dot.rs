//! Graphviz rendering of an `ExecGraph`.

use std::fmt::Write;

use xflow_core::id::BufferId;
use xflow_operators::BufProvision;

use crate::graph::ExecGraph;

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// DOT text for `graph`: one node per stream (adapters drawn as boxes), one
/// edge per dataflow labelled with who provides its memory, implicit edges
/// dashed. Graph-level inputs and outputs become point nodes.
pub fn render_graphviz(graph: &ExecGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", graph.id());
    let _ = writeln!(out, "  rankdir=LR;");

    for id in graph.stream_ids() {
        let shape = if graph.is_adapter(id) { "box" } else { "ellipse" };
        let _ = writeln!(
            out,
            "  s{} [label=\"{}\\n{}\", shape={shape}];",
            id.get(),
            escape(graph.stream_name(id)),
            graph.stream(id).kind()
        );
    }

    for b in 0..graph.buffer_count() {
        let buffer = BufferId::new(b as u64);
        let provision = if graph.is_bound() {
            graph.buffer(buffer).provision()
        } else {
            graph
                .producer_of(buffer)
                .map(|s| graph.stream(s).output_buf_provision())
                .unwrap_or(BufProvision::None)
        };
        let from = match graph.producer_of(buffer) {
            Some(s) => format!("s{}", s.get()),
            None => {
                let _ = writeln!(out, "  in{b} [shape=point];");
                format!("in{b}")
            }
        };
        let to = match graph.consumer_of(buffer) {
            Some(s) => format!("s{}", s.get()),
            None => {
                let _ = writeln!(out, "  out{b} [shape=point];");
                format!("out{b}")
            }
        };
        let _ = writeln!(out, "  {from} -> {to} [label=\"{provision}\"];");
    }

    for (s, t) in graph.implicit_edges() {
        let _ = writeln!(out, "  s{} -> s{} [style=dashed];", s.get(), t.get());
    }
    out.push_str("}\n");
    out
}
