//! YAML graph description tests: parsing, validation and running the parsed
//! graph the way the `xflow` binary does.

use std::fs;

use xflow_core::tuple::Datum;
use xflow_exec::Engine;
use xflow_graph::dot::render_graphviz;
use xflow_graph::yaml::{load_graph, parse_graph, to_yaml};
use xflow_graph::GraphError;

const PIPELINE: &str = r#"
config:
  cache_pages: 32
  cache_reserve_percentage: 0
  expected_concurrent_statements: 1
  quantum_tuples: 8
streams:
  - name: src
    kind: values
    params: { count: 100, provision: consumer }
  - name: small
    kind: filter
    params: { column: n, op: "<", value: 10 }
  - name: uniq
    kind: unique
    params: { column: n }
chains:
  - [src, small, uniq]
"#;

#[test]
fn test_parse_and_run_pipeline() {
    let def = parse_graph(PIPELINE).unwrap();
    assert_eq!(def.streams.len(), 3);
    assert_eq!(def.dataflows.len(), 2);
    assert_eq!(def.resolve_root().unwrap(), "uniq");

    let cfg = def.config.clone().unwrap();
    assert_eq!(cfg.quantum_tuples, Some(8));
    let engine = Engine::new(cfg).unwrap();
    let out = engine.run(&def).unwrap();
    let values: Vec<i64> = out
        .rows
        .iter()
        .map(|t| match t.get(0) {
            Some(Datum::Int64(v)) => *v,
            other => panic!("unexpected value {other:?}"),
        })
        .collect();
    assert_eq!(values, (0..10).collect::<Vec<_>>());
    assert_eq!(out.report.rows, 10);
    assert!(out.report.finished_ms >= out.report.started_ms);
}

#[test]
fn test_explain_shows_adapters() {
    let def = parse_graph(PIPELINE).unwrap();
    let engine = Engine::new(def.config.clone().unwrap()).unwrap();
    let graph = engine.build(&def).unwrap();
    let dot = render_graphviz(&graph);
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("src#0.provisioner"));
    assert!(dot.contains("uniq#0.provisioner"));
    assert!(dot.contains("scratch_buffer"));
}

#[test]
fn test_rejects_bad_descriptions() {
    // unknown top-level key
    let err = parse_graph("streams: []\nsteps: []\n").unwrap_err();
    assert!(matches!(err, GraphError::Yaml(_)), "{err}");

    // chain through a stream that does not exist
    let err = parse_graph(
        r#"
streams:
  - { name: a, kind: values, params: { count: 1 } }
chains:
  - [a, ghost]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::Core(_)), "{err}");
    assert!(err.to_string().contains("ghost"), "{err}");

    // a one-element chain connects nothing
    let err = parse_graph(
        r#"
streams:
  - { name: a, kind: values, params: { count: 1 } }
chains:
  - [a]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, GraphError::Plan(_)), "{err}");
}

#[test]
fn test_canonical_yaml_loads_from_disk() {
    let def = parse_graph(PIPELINE).unwrap();
    let dir = std::env::temp_dir().join(format!("xflow-yaml-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("pipeline.yaml");
    fs::write(&path, to_yaml(&def).unwrap()).unwrap();

    let loaded = load_graph(&path).unwrap();
    assert_eq!(loaded, def);

    assert!(matches!(
        load_graph(dir.join("missing.yaml")),
        Err(GraphError::Io(_))
    ));
    fs::remove_dir_all(&dir).ok();
}
