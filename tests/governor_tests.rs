//! Resource governor tests: allocation scenarios, accounting invariants and
//! concurrent statements sharing one governor.

use std::sync::Arc;
use std::thread;

use serde_json::json;

use xflow_core::config::EngineConfig;
use xflow_core::error::Error;
use xflow_core::id::{GraphId, StreamId};
use xflow_core::plan::GraphDef;
use xflow_core::resource::{
    ResourceDemand, ResourceGovernor, ResourceKnobs, ResourceQuantity, ResourceRequirements,
    ResourceType, StreamRequirement,
};
use xflow_exec::{Engine, ExecError};
use xflow_mem::{GrantLease, SimpleGovernor};

struct FakeGraph {
    id: GraphId,
    reqs: Vec<ResourceRequirements>,
    granted: Vec<u32>,
}

impl FakeGraph {
    fn new(reqs: Vec<ResourceRequirements>) -> Self {
        Self {
            id: GraphId::next(),
            reqs,
            granted: Vec::new(),
        }
    }

    fn total(&self) -> u32 {
        self.granted.iter().sum()
    }
}

impl ResourceDemand for FakeGraph {
    fn graph_id(&self) -> GraphId {
        self.id
    }

    fn stream_requirements(&self) -> Vec<StreamRequirement> {
        self.reqs
            .iter()
            .enumerate()
            .map(|(i, r)| StreamRequirement {
                stream: StreamId::new(i as u64),
                name: format!("s{i}"),
                requirements: *r,
            })
            .collect()
    }

    fn apply_allocation(&mut self, grants: &[(StreamId, ResourceQuantity)]) {
        self.granted = grants.iter().map(|(_, q)| q.cache_pages).collect();
    }
}

fn governor(pages: u32, reserve: u32, expected: u32) -> SimpleGovernor {
    SimpleGovernor::new(
        ResourceKnobs {
            expected_concurrent_statements: expected,
            cache_reserve_percentage: reserve,
        },
        ResourceQuantity {
            threads: 4,
            cache_pages: pages,
        },
    )
    .unwrap()
}

fn assert_books_balance(gov: &SimpleGovernor, pages: u32) {
    let assigned = gov.resources_assigned().cache_pages;
    let available = gov.resources_available().cache_pages;
    assert_eq!(assigned + available, pages - gov.reserved_pages());
}

#[test]
fn three_accurate_streams_share_the_per_graph_cap() {
    let gov = governor(100, 0, 2);
    assert_eq!(gov.per_graph_allocation(), 50);

    let mut g = FakeGraph::new(vec![ResourceRequirements::accurate(10, 20); 3]);
    gov.request_resources(&mut g).unwrap();
    assert_eq!(g.granted, vec![17, 17, 16]);
    assert_eq!(g.total(), 50);
    assert_eq!(gov.resources_assigned().cache_pages, 50);
    assert_eq!(gov.resources_available().cache_pages, 50);
}

#[test]
fn minimums_above_availability_are_refused() {
    let gov = governor(20, 0, 2);
    let mut g = FakeGraph::new(vec![ResourceRequirements::accurate(10, 20); 3]);
    let err = gov.request_resources(&mut g).unwrap_err();
    match err {
        Error::OutOfResources {
            required, available, ..
        } => {
            assert_eq!(required, 30);
            assert_eq!(available, 20);
        }
        other => panic!("expected OutOfResources, got {other}"),
    }
    assert!(g.granted.is_empty());
    assert_eq!(gov.resources_assigned().cache_pages, 0);
    assert_eq!(gov.active_graphs(), 0);
}

#[test]
fn minimums_above_the_cap_still_fit_availability() {
    // cap 10, but 30 pages are free: minimums are granted
    let gov = governor(30, 0, 3);
    let mut g = FakeGraph::new(vec![ResourceRequirements::accurate(5, 9); 3]);
    gov.request_resources(&mut g).unwrap();
    assert_eq!(g.granted, vec![5, 5, 5]);
}

#[test]
fn returning_twice_is_a_no_op() {
    let gov = governor(100, 0, 1);
    let mut g = FakeGraph::new(vec![ResourceRequirements::accurate(10, 20)]);
    gov.request_resources(&mut g).unwrap();
    assert_eq!(gov.resources_assigned().cache_pages, 20);

    gov.return_resources(g.id);
    gov.return_resources(g.id);
    assert_eq!(gov.resources_assigned().cache_pages, 0);
    assert_eq!(gov.resources_available().cache_pages, 100);
    assert_books_balance(&gov, 100);
}

#[test]
fn books_balance_across_a_request_sequence() {
    let gov = governor(120, 5, 3);
    let shapes = [
        vec![ResourceRequirements::accurate(4, 12)],
        vec![
            ResourceRequirements::estimate(2, 6),
            ResourceRequirements::unbounded(1),
        ],
        vec![ResourceRequirements::accurate(30, 30)],
        vec![ResourceRequirements::accurate(1, 1); 5],
        vec![ResourceRequirements::estimate(10, 80)],
    ];

    let mut held: Vec<FakeGraph> = Vec::new();
    for round in 0..4 {
        for shape in &shapes {
            let mut g = FakeGraph::new(shape.clone());
            let cap = gov.per_graph_allocation();
            let min_sum: u32 = shape.iter().map(|r| r.min.cache_pages).sum();
            if gov.request_resources(&mut g).is_ok() {
                assert!(g.total() >= min_sum);
                assert!(
                    g.total() <= cap.max(min_sum),
                    "grant {} above cap {cap}",
                    g.total()
                );
                for (r, &p) in shape.iter().zip(&g.granted) {
                    assert!(p >= r.min.cache_pages);
                }
                held.push(g);
            }
            assert_books_balance(&gov, 120);
        }
        // give back every other grant between rounds
        let mut keep = Vec::new();
        for (i, g) in held.drain(..).enumerate() {
            if (i + round) % 2 == 0 {
                gov.return_resources(g.id);
            } else {
                keep.push(g);
            }
            assert_books_balance(&gov, 120);
        }
        held = keep;
    }
    for g in held {
        gov.return_resources(g.id);
    }
    assert_eq!(gov.resources_assigned(), ResourceQuantity::ZERO);
    assert_books_balance(&gov, 120);
}

#[test]
fn availability_cannot_shrink_below_assignment() {
    let gov = governor(100, 0, 1);
    let mut g = FakeGraph::new(vec![ResourceRequirements::accurate(60, 60)]);
    gov.request_resources(&mut g).unwrap();
    assert!(!gov.set_resource_availability(&ResourceQuantity::pages(50), ResourceType::CachePages));
    assert_eq!(gov.resources_available().cache_pages, 40);
    gov.return_resources(g.id);
    assert!(gov.set_resource_availability(&ResourceQuantity::pages(50), ResourceType::CachePages));
    assert_eq!(gov.resources_available().cache_pages, 50);
}

#[test]
fn concurrent_leases_never_overcommit() {
    let gov = Arc::new(governor(64, 0, 4));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let gov = Arc::clone(&gov);
            thread::spawn(move || {
                let mut granted = 0u32;
                for i in 0..200 {
                    let mut g = FakeGraph::new(vec![
                        ResourceRequirements::accurate(2, 8),
                        ResourceRequirements::estimate(1, 4 + (t + i) % 5),
                    ]);
                    let shared: Arc<dyn ResourceGovernor> = gov.clone();
                    if let Ok(lease) = GrantLease::acquire(shared, &mut g) {
                        assert!(gov.resources_assigned().cache_pages <= 64);
                        granted += 1;
                        drop(lease);
                    }
                }
                granted
            })
        })
        .collect();

    let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(total > 0);
    assert_eq!(gov.resources_assigned(), ResourceQuantity::ZERO);
    assert_eq!(gov.active_graphs(), 0);
    assert_books_balance(&gov, 64);
}

#[test]
fn concurrent_statements_share_one_engine() {
    let engine = Arc::new(
        Engine::new(EngineConfig {
            cache_pages: 32,
            cache_reserve_percentage: 0,
            expected_concurrent_statements: 4,
            ..EngineConfig::default()
        })
        .unwrap(),
    );
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let def: GraphDef = serde_json::from_value(json!({
                    "streams": [
                        {"name": "src", "kind": "values", "params": {"count": 50 + t}},
                        {"name": "even", "kind": "filter", "params": {"column": "n", "op": "<", "value": 10}}
                    ],
                    "dataflows": [{"source": "src", "target": "even"}]
                }))
                .unwrap();
                let mut rows = 0;
                for _ in 0..25 {
                    match engine.run(&def) {
                        Ok(out) => rows += out.rows.len(),
                        Err(ExecError::Resource(_)) => {}
                        Err(e) => panic!("{e}"),
                    }
                }
                rows
            })
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap() % 10, 0);
    }
    assert_eq!(engine.governor().resources_assigned(), ResourceQuantity::ZERO);
    assert_eq!(engine.pool().used_pages(), 0);
}
