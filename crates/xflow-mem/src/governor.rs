//! Reference resource governor.
//!
//! One per kernel instance. A single mutex guards the books; every public
//! call is one short critical section with no nested locking, and streams are
//! told about their grants only after the lock is released.
//!
//! Invariant: `assigned + available == total - reserved` for cache pages and
//! `assigned + available == total` for threads, after every call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use xflow_core::error::{Error, Result};
use xflow_core::id::{GraphId, StreamId};
use xflow_core::resource::{
    KnobKind, ResourceDemand, ResourceGovernor, ResourceKnobs, ResourceQuantity, ResourceType,
};
use xflow_core::target::StatsTarget;

use crate::allocation::{distribute_pages, PageDemand};

struct GraphGrant {
    total: ResourceQuantity,
    streams: Vec<(String, ResourceQuantity)>,
}

struct GovernorState {
    knobs: ResourceKnobs,
    total: ResourceQuantity,
    reserved_pages: u32,
    assigned: ResourceQuantity,
    available: ResourceQuantity,
    per_graph_pages: u32,
    grants: HashMap<GraphId, GraphGrant>,
    peak_assigned_pages: u32,
    requests_granted: u64,
    requests_denied: u64,
}

impl GovernorState {
    fn recompute_per_graph(&mut self) {
        let pool = self.assigned.cache_pages + self.available.cache_pages;
        self.per_graph_pages = pool / self.knobs.expected_concurrent_statements.max(1);
    }
}

fn reserve_for(total_pages: u32, percentage: u32) -> u32 {
    (u64::from(total_pages) * u64::from(percentage) / 100) as u32
}

pub struct SimpleGovernor {
    state: Mutex<GovernorState>,
}

impl SimpleGovernor {
    pub fn new(knobs: ResourceKnobs, total: ResourceQuantity) -> Result<Self> {
        if knobs.expected_concurrent_statements == 0 {
            return Err(Error::Config(
                "expected_concurrent_statements must be positive".into(),
            ));
        }
        if knobs.cache_reserve_percentage > 100 {
            return Err(Error::Config(format!(
                "cache_reserve_percentage {} exceeds 100",
                knobs.cache_reserve_percentage
            )));
        }
        let reserved_pages = reserve_for(total.cache_pages, knobs.cache_reserve_percentage);
        let mut state = GovernorState {
            knobs,
            total,
            reserved_pages,
            assigned: ResourceQuantity::ZERO,
            available: ResourceQuantity {
                threads: total.threads,
                cache_pages: total.cache_pages - reserved_pages,
            },
            per_graph_pages: 0,
            grants: HashMap::new(),
            peak_assigned_pages: 0,
            requests_granted: 0,
            requests_denied: 0,
        };
        state.recompute_per_graph();
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, GovernorState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn knobs(&self) -> ResourceKnobs {
        self.lock().knobs
    }

    pub fn resources_assigned(&self) -> ResourceQuantity {
        self.lock().assigned
    }

    pub fn resources_available(&self) -> ResourceQuantity {
        self.lock().available
    }

    pub fn reserved_pages(&self) -> u32 {
        self.lock().reserved_pages
    }

    pub fn per_graph_allocation(&self) -> u32 {
        self.lock().per_graph_pages
    }

    /// What `graph` currently holds, if anything.
    pub fn grant_for(&self, graph: GraphId) -> Option<ResourceQuantity> {
        self.lock().grants.get(&graph).map(|g| g.total)
    }

    pub fn active_graphs(&self) -> usize {
        self.lock().grants.len()
    }
}

impl ResourceGovernor for SimpleGovernor {
    fn set_resource_knob(&self, knobs: &ResourceKnobs, kind: KnobKind) -> bool {
        let mut st = self.lock();
        match kind {
            KnobKind::ExpectedConcurrentStatements => {
                if knobs.expected_concurrent_statements == 0 {
                    return false;
                }
                st.knobs.expected_concurrent_statements = knobs.expected_concurrent_statements;
            }
            KnobKind::CacheReservePercentage => {
                let pct = knobs.cache_reserve_percentage;
                if pct > 100 {
                    return false;
                }
                let reserve = reserve_for(st.total.cache_pages, pct);
                if st.total.cache_pages - reserve < st.assigned.cache_pages {
                    return false;
                }
                st.reserved_pages = reserve;
                st.available.cache_pages = st.total.cache_pages - reserve - st.assigned.cache_pages;
                st.knobs.cache_reserve_percentage = pct;
            }
        }
        st.recompute_per_graph();
        #[cfg(feature = "tracing")]
        tracing::debug!(?kind, per_graph = st.per_graph_pages, "resource knob changed");
        true
    }

    fn set_resource_availability(&self, total: &ResourceQuantity, kind: ResourceType) -> bool {
        let mut st = self.lock();
        match kind {
            ResourceType::CachePages => {
                let reserve = reserve_for(total.cache_pages, st.knobs.cache_reserve_percentage);
                if total.cache_pages - reserve < st.assigned.cache_pages {
                    return false;
                }
                st.total.cache_pages = total.cache_pages;
                st.reserved_pages = reserve;
                st.available.cache_pages = total.cache_pages - reserve - st.assigned.cache_pages;
                st.recompute_per_graph();
            }
            ResourceType::Threads => {
                if total.threads < st.assigned.threads {
                    return false;
                }
                st.total.threads = total.threads;
                st.available.threads = total.threads - st.assigned.threads;
            }
        }
        true
    }

    fn request_resources(&self, graph: &mut dyn ResourceDemand) -> Result<()> {
        let graph_id = graph.graph_id();
        let reqs = graph.stream_requirements();

        let grants: Vec<(StreamId, ResourceQuantity)> = {
            let mut st = self.lock();
            if st.grants.contains_key(&graph_id) {
                return Err(Error::Invariant(format!(
                    "{graph_id} already holds resources"
                )));
            }

            let demands: Vec<PageDemand> =
                reqs.iter().map(|r| PageDemand::from(&r.requirements)).collect();
            let reference = st.available.cache_pages.min(st.per_graph_pages);
            let pages = match distribute_pages(&demands, reference, st.available.cache_pages) {
                Ok(pages) => pages,
                Err(shortfall) => {
                    st.requests_denied += 1;
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        graph = %graph_id,
                        required = shortfall.required,
                        available = shortfall.available,
                        "cache page request denied"
                    );
                    return Err(Error::OutOfResources {
                        graph: graph_id,
                        required: shortfall.required,
                        available: shortfall.available,
                    });
                }
            };

            let threads_needed: u64 = reqs
                .iter()
                .map(|r| u64::from(r.requirements.min.threads))
                .sum();
            if threads_needed > u64::from(st.available.threads) {
                st.requests_denied += 1;
                return Err(Error::OutOfThreads {
                    graph: graph_id,
                    required: threads_needed,
                    available: u64::from(st.available.threads),
                });
            }

            let grants: Vec<(StreamId, ResourceQuantity)> = reqs
                .iter()
                .zip(&pages)
                .map(|(r, &p)| {
                    (
                        r.stream,
                        ResourceQuantity {
                            threads: r.requirements.min.threads,
                            cache_pages: p,
                        },
                    )
                })
                .collect();
            let total = ResourceQuantity {
                threads: threads_needed as u32,
                cache_pages: pages.iter().sum(),
            };

            st.assigned.cache_pages += total.cache_pages;
            st.available.cache_pages -= total.cache_pages;
            st.assigned.threads += total.threads;
            st.available.threads -= total.threads;
            st.peak_assigned_pages = st.peak_assigned_pages.max(st.assigned.cache_pages);
            st.requests_granted += 1;
            st.grants.insert(
                graph_id,
                GraphGrant {
                    total,
                    streams: reqs
                        .iter()
                        .zip(&grants)
                        .map(|(r, (_, q))| (r.name.clone(), *q))
                        .collect(),
                },
            );

            #[cfg(feature = "tracing")]
            tracing::debug!(
                graph = %graph_id,
                pages = total.cache_pages,
                reference,
                available = st.available.cache_pages,
                "resources granted"
            );
            grants
        };

        graph.apply_allocation(&grants);
        Ok(())
    }

    fn return_resources(&self, graph: GraphId) {
        let mut st = self.lock();
        let Some(grant) = st.grants.remove(&graph) else {
            return;
        };
        st.assigned.cache_pages -= grant.total.cache_pages;
        st.available.cache_pages += grant.total.cache_pages;
        st.assigned.threads -= grant.total.threads;
        st.available.threads += grant.total.threads;
        #[cfg(feature = "tracing")]
        tracing::debug!(graph = %graph, pages = grant.total.cache_pages, "resources returned");
    }

    fn write_stats(&self, target: &mut dyn StatsTarget) {
        let st = self.lock();
        target.write_counter("governor.pages.total", i64::from(st.total.cache_pages));
        target.write_counter("governor.pages.reserved", i64::from(st.reserved_pages));
        target.write_counter("governor.pages.assigned", i64::from(st.assigned.cache_pages));
        target.write_counter("governor.pages.available", i64::from(st.available.cache_pages));
        target.write_counter("governor.pages.per_graph", i64::from(st.per_graph_pages));
        target.write_counter(
            "governor.pages.peak_assigned",
            i64::from(st.peak_assigned_pages),
        );
        target.write_counter("governor.threads.assigned", i64::from(st.assigned.threads));
        target.write_counter("governor.threads.available", i64::from(st.available.threads));
        target.write_counter("governor.graphs.active", st.grants.len() as i64);
        target.write_counter("governor.requests.granted", st.requests_granted as i64);
        target.write_counter("governor.requests.denied", st.requests_denied as i64);

        let mut graphs: Vec<_> = st.grants.iter().collect();
        graphs.sort_by_key(|(id, _)| **id);
        for (id, grant) in graphs {
            for (stream, q) in &grant.streams {
                target.write_counter(
                    &format!("governor.alloc.{}.{}", id.get(), stream),
                    i64::from(q.cache_pages),
                );
            }
        }
    }
}

/// Holds a graph's grant and returns it on drop.
///
/// Lets the statement layer unwind through errors and aborts without leaking
/// pages.
pub struct GrantLease {
    governor: Arc<dyn ResourceGovernor>,
    graph: GraphId,
}

impl GrantLease {
    pub fn acquire(
        governor: Arc<dyn ResourceGovernor>,
        graph: &mut dyn ResourceDemand,
    ) -> Result<Self> {
        governor.request_resources(graph)?;
        Ok(Self {
            governor,
            graph: graph.graph_id(),
        })
    }

    pub fn graph(&self) -> GraphId {
        self.graph
    }
}

impl Drop for GrantLease {
    fn drop(&mut self) {
        self.governor.return_resources(self.graph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xflow_core::resource::{ResourceRequirements, StreamRequirement};
    use xflow_core::target::MapStatsTarget;

    struct FakeGraph {
        id: GraphId,
        reqs: Vec<ResourceRequirements>,
        granted: Vec<ResourceQuantity>,
    }

    impl FakeGraph {
        fn new(reqs: Vec<ResourceRequirements>) -> Self {
            Self {
                id: GraphId::next(),
                reqs,
                granted: Vec::new(),
            }
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
            self.granted = grants.iter().map(|(_, q)| *q).collect();
        }
    }

    fn governor(pages: u32, reserve: u32, expected: u32) -> SimpleGovernor {
        SimpleGovernor::new(
            ResourceKnobs {
                expected_concurrent_statements: expected,
                cache_reserve_percentage: reserve,
            },
            ResourceQuantity {
                threads: 2,
                cache_pages: pages,
            },
        )
        .unwrap()
    }

    #[test]
    fn default_reserve_leaves_95_of_100() {
        let gov = governor(100, ResourceKnobs::DEFAULT_RESERVE_PERCENTAGE, 1);
        assert_eq!(gov.reserved_pages(), 5);
        assert_eq!(gov.resources_available().cache_pages, 95);
        assert_eq!(gov.per_graph_allocation(), 95);
    }

    #[test]
    fn knob_change_refused_when_it_would_undercommit() {
        let gov = governor(100, 0, 1);
        let mut g = FakeGraph::new(vec![ResourceRequirements::accurate(60, 60)]);
        gov.request_resources(&mut g).unwrap();

        let knobs = ResourceKnobs {
            expected_concurrent_statements: 1,
            cache_reserve_percentage: 50,
        };
        assert!(!gov.set_resource_knob(&knobs, KnobKind::CacheReservePercentage));
        assert_eq!(gov.reserved_pages(), 0);

        let knobs = ResourceKnobs {
            cache_reserve_percentage: 40,
            ..knobs
        };
        assert!(gov.set_resource_knob(&knobs, KnobKind::CacheReservePercentage));
        assert_eq!(gov.resources_available().cache_pages, 0);

        assert!(!gov.set_resource_availability(
            &ResourceQuantity::pages(90),
            ResourceType::CachePages
        ));
        assert!(gov.set_resource_availability(
            &ResourceQuantity::pages(200),
            ResourceType::CachePages
        ));
        assert_eq!(gov.resources_available().cache_pages, 200 - 80 - 60);
    }

    #[test]
    fn expected_statements_changes_cap() {
        let gov = governor(100, 0, 1);
        let knobs = ResourceKnobs {
            expected_concurrent_statements: 4,
            cache_reserve_percentage: 0,
        };
        assert!(gov.set_resource_knob(&knobs, KnobKind::ExpectedConcurrentStatements));
        assert_eq!(gov.per_graph_allocation(), 25);
        let zero = ResourceKnobs {
            expected_concurrent_statements: 0,
            ..knobs
        };
        assert!(!gov.set_resource_knob(&zero, KnobKind::ExpectedConcurrentStatements));
        assert_eq!(gov.per_graph_allocation(), 25);
    }

    #[test]
    fn double_request_is_rejected() {
        let gov = governor(100, 0, 1);
        let mut g = FakeGraph::new(vec![ResourceRequirements::accurate(1, 1)]);
        gov.request_resources(&mut g).unwrap();
        assert!(matches!(
            gov.request_resources(&mut g),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn threads_are_granted_at_minimum() {
        let gov = governor(100, 0, 1);
        let mut req = ResourceRequirements::accurate(1, 1);
        req.min.threads = 2;
        let mut g = FakeGraph::new(vec![req]);
        gov.request_resources(&mut g).unwrap();
        assert_eq!(g.granted[0].threads, 2);

        let mut h = FakeGraph::new(vec![req]);
        assert!(matches!(
            gov.request_resources(&mut h),
            Err(Error::OutOfThreads { .. })
        ));
        assert_eq!(gov.resources_assigned().cache_pages, 1);
    }

    #[test]
    fn lease_returns_on_drop_and_stats_track_it() {
        let gov: Arc<SimpleGovernor> = Arc::new(governor(100, 0, 1));
        let mut g = FakeGraph::new(vec![
            ResourceRequirements::accurate(10, 20),
            ResourceRequirements::accurate(5, 5),
        ]);
        {
            let lease = GrantLease::acquire(gov.clone(), &mut g).unwrap();
            assert_eq!(lease.graph(), g.id);
            let mut stats = MapStatsTarget::default();
            gov.write_stats(&mut stats);
            assert_eq!(stats.get("governor.pages.assigned"), Some(25));
            assert_eq!(stats.get("governor.graphs.active"), Some(1));
            assert_eq!(
                stats.get(&format!("governor.alloc.{}.s0", g.id.get())),
                Some(20)
            );
        }
        assert_eq!(gov.resources_assigned(), ResourceQuantity::ZERO);
        let mut stats = MapStatsTarget::default();
        gov.write_stats(&mut stats);
        assert_eq!(stats.get("governor.pages.peak_assigned"), Some(25));
        assert_eq!(stats.get("governor.requests.granted"), Some(1));
    }
}
