//! DFS scheduler tests through the statement runtime: quanta, cancellation,
//! dynamic parameters and rows diverted to the error target.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;

use xflow_core::abort::AbortFlag;
use xflow_core::config::EngineConfig;
use xflow_core::id::DynamicParamId;
use xflow_core::plan::GraphDef;
use xflow_core::target::{CollectingErrorTarget, ErrorLevel};
use xflow_core::tuple::{DataType, Datum, Tuple, TupleDesc};
use xflow_exec::{Engine, ExecError};
use xflow_operators::{
    BufProvision, BufState, ExecResult, ExecStream, OpError, OpenContext, PrepareContext, Quantum,
    StreamContext,
};

/// Producer of `0, 1, 2, ...` one row per page, forever.
struct Endless {
    next: i64,
}

impl ExecStream for Endless {
    fn kind(&self) -> &'static str {
        "endless"
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
        ctx.expect_arity(0, 1)?;
        ctx.set_output_desc(0, TupleDesc::single("n", DataType::Int64))
    }

    fn open(&mut self, _ctx: &mut OpenContext<'_>, _restart: bool) -> Result<(), OpError> {
        self.next = 0;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut StreamContext<'_>, _quantum: &Quantum) -> Result<ExecResult, OpError> {
        let out = ctx.output(0);
        if out.is_consumption_possible() || out.state() == BufState::Eos {
            return Ok(ExecResult::Overflow);
        }
        out.provide_buffer_for_consumption(vec![Tuple::new(vec![Datum::Int64(self.next)])]);
        self.next += 1;
        Ok(ExecResult::Overflow)
    }

    fn output_buf_provision(&self) -> BufProvision {
        BufProvision::Producer
    }
}

fn engine(quantum_tuples: Option<u32>) -> Engine {
    Engine::new(EngineConfig {
        cache_pages: 64,
        cache_reserve_percentage: 0,
        expected_concurrent_statements: 1,
        quantum_tuples,
        ..EngineConfig::default()
    })
    .unwrap()
}

fn def(v: serde_json::Value) -> GraphDef {
    serde_json::from_value(v).unwrap()
}

fn ints(rows: &[Tuple]) -> Vec<i64> {
    rows.iter().filter_map(|t| t.get(0)?.as_i64()).collect()
}

#[test]
fn abort_from_another_thread_ends_the_statement() {
    let mut engine = engine(None);
    engine
        .registry_mut()
        .register("endless", |_| Ok(Box::new(Endless { next: 0 })));
    // nothing ever passes the filter, so the walk never returns on its own
    let graph = def(json!({
        "streams": [
            {"name": "numbers", "kind": "endless"},
            {"name": "none", "kind": "filter", "params": {"column": "n", "op": "<", "value": 0}}
        ],
        "dataflows": [{"source": "numbers", "target": "none"}]
    }));

    let abort = AbortFlag::new();
    let remote = abort.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        remote.abort();
    });

    let err = engine.run_with_abort(&graph, &abort).unwrap_err();
    canceller.join().unwrap();
    assert!(matches!(err, ExecError::Aborted), "{err}");
    assert_eq!(engine.governor().resources_assigned().cache_pages, 0);
    assert_eq!(engine.governor().active_graphs(), 0);
    assert_eq!(engine.pool().used_pages(), 0);

    // a fresh flag runs the next statement normally
    let out = engine
        .run(&def(json!({"streams": [{"name": "src", "kind": "values", "params": {"count": 3}}]})))
        .unwrap();
    assert_eq!(ints(&out.rows), vec![0, 1, 2]);
}

#[test]
fn quantum_size_never_changes_the_result() {
    let graph = def(json!({
        "streams": [
            {"name": "src", "kind": "values", "params": {"count": 200, "provision": "consumer"}},
            {"name": "mid", "kind": "filter", "params": {"column": "n", "op": ">=", "value": 50}},
            {"name": "low", "kind": "filter", "params": {"column": "n", "op": "<", "value": 150}},
            {"name": "out", "kind": "forward", "params": {"input": "consumer"}}
        ],
        "dataflows": [
            {"source": "src", "target": "mid"},
            {"source": "mid", "target": "low"},
            {"source": "low", "target": "out"}
        ]
    }));
    let expected: Vec<i64> = (50..150).collect();
    for quantum in [None, Some(1), Some(3), Some(64)] {
        let out = engine(quantum).run(&graph).unwrap();
        assert_eq!(ints(&out.rows), expected, "quantum {quantum:?}");
    }
}

#[test]
fn counters_written_upstream_are_read_downstream() {
    let engine = engine(None);
    let out = engine
        .run(&def(json!({
            "streams": [
                {"name": "small", "kind": "values", "params": {"count": 5}},
                {"name": "counted", "kind": "row_count", "params": {"param": 1}},
                {"name": "big", "kind": "values", "params": {"count": 10}},
                {"name": "below", "kind": "filter", "params": {"column": "n", "op": "<", "param": 1}},
                {"name": "total", "kind": "barrier"}
            ],
            "dataflows": [
                {"source": "small", "target": "counted"},
                {"source": "big", "target": "below"},
                {"source": "counted", "target": "total"},
                {"source": "below", "target": "total"}
            ]
        })))
        .unwrap();
    // the barrier drains `counted` first, so `below` compares against 5
    assert_eq!(ints(&out.rows), vec![10]);
    assert_eq!(
        engine.params().read_param(DynamicParamId::new(1)).unwrap(),
        Datum::Int64(5)
    );
}

#[test]
fn duplicates_are_diverted_with_their_rows() {
    let mut engine = engine(Some(2));
    let errors = Arc::new(CollectingErrorTarget::new());
    engine.set_error_target(errors.clone());

    let out = engine
        .run(&def(json!({
            "streams": [
                {"name": "src", "kind": "values", "params": {
                    "columns": [{"name": "k", "type": "int64"}, {"name": "v", "type": "text"}],
                    "rows": [[1, "a"], [2, "b"], [1, "c"], [3, "d"], [2, "e"]]
                }},
                {"name": "dedup", "kind": "unique", "params": {"column": "k"}}
            ],
            "dataflows": [{"source": "src", "target": "dedup"}]
        })))
        .unwrap();
    assert_eq!(ints(&out.rows), vec![1, 2, 3]);

    let records = errors.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.level == ErrorLevel::Warning));
    let diverted: Vec<Datum> = records
        .iter()
        .filter_map(|r| r.row.as_ref()?.get(1).cloned())
        .collect();
    assert_eq!(diverted, vec![Datum::Text("c".into()), Datum::Text("e".into())]);
}

#[test]
fn hard_stream_failures_still_return_resources() {
    let engine = engine(None);
    let err = engine
        .run(&def(json!({
            "streams": [
                {"name": "src", "kind": "values", "params": {
                    "columns": [{"name": "k", "type": "int64"}],
                    "rows": [[1], [1]]
                }},
                {"name": "strict", "kind": "unique", "params": {"column": "k", "fail_on_duplicate": true}}
            ],
            "dataflows": [{"source": "src", "target": "strict"}]
        })))
        .unwrap_err();
    assert!(matches!(err, ExecError::Graph(_)), "{err}");
    assert!(err.to_string().contains("strict"), "{err}");
    assert_eq!(engine.governor().resources_assigned().cache_pages, 0);
    assert_eq!(engine.pool().used_pages(), 0);
}
