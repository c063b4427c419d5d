//! Resource quantities and the governor contract.
//!
//! The concrete governor lives in `xflow-mem`; graphs implement
//! `ResourceDemand` in `xflow-graph`. Keeping only the traits here lets the
//! two sides meet without depending on each other.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::id::{GraphId, StreamId};
use crate::target::StatsTarget;

/// An amount of the resources the governor arbitrates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceQuantity {
    pub threads: u32,
    pub cache_pages: u32,
}

impl ResourceQuantity {
    pub const ZERO: Self = Self {
        threads: 0,
        cache_pages: 0,
    };

    pub const fn pages(cache_pages: u32) -> Self {
        Self {
            threads: 0,
            cache_pages,
        }
    }
}

impl fmt::Display for ResourceQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pages/{} threads", self.cache_pages, self.threads)
    }
}

/// How much the governor can trust a stream's optimum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceSettingType {
    /// The optimum is exact; more pages are wasted.
    #[default]
    Accurate,
    /// The optimum is a guess; surplus pages may still help.
    Estimate,
    /// No useful optimum; the stream can use whatever it gets.
    Unbounded,
}

/// `(minimum, optimum, accuracy)` reported by a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub min: ResourceQuantity,
    pub opt: ResourceQuantity,
    pub setting: ResourceSettingType,
}

impl ResourceRequirements {
    pub const fn pages(min: u32, opt: u32, setting: ResourceSettingType) -> Self {
        Self {
            min: ResourceQuantity::pages(min),
            opt: ResourceQuantity::pages(opt),
            setting,
        }
    }

    pub const fn accurate(min: u32, opt: u32) -> Self {
        Self::pages(min, opt, ResourceSettingType::Accurate)
    }

    pub const fn estimate(min: u32, opt: u32) -> Self {
        Self::pages(min, opt, ResourceSettingType::Estimate)
    }

    pub const fn unbounded(min: u32) -> Self {
        Self::pages(min, min, ResourceSettingType::Unbounded)
    }
}

/// Tunables the governor reads when computing its caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceKnobs {
    pub expected_concurrent_statements: u32,
    pub cache_reserve_percentage: u32,
}

impl ResourceKnobs {
    pub const DEFAULT_RESERVE_PERCENTAGE: u32 = 5;
}

impl Default for ResourceKnobs {
    fn default() -> Self {
        Self {
            expected_concurrent_statements: 1,
            cache_reserve_percentage: Self::DEFAULT_RESERVE_PERCENTAGE,
        }
    }
}

/// Which knob a `set_resource_knob` call changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnobKind {
    ExpectedConcurrentStatements,
    CacheReservePercentage,
}

/// Which pool a `set_resource_availability` call resizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    Threads,
    CachePages,
}

/// One stream's requirement as seen by the governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequirement {
    pub stream: StreamId,
    pub name: String,
    pub requirements: ResourceRequirements,
}

/// Something that asks the governor for resources: in practice a prepared graph.
pub trait ResourceDemand {
    fn graph_id(&self) -> GraphId;

    /// Requirements of every stream, in a stable order.
    fn stream_requirements(&self) -> Vec<StreamRequirement>;

    /// Tell each stream what it was granted.
    fn apply_allocation(&mut self, grants: &[(StreamId, ResourceQuantity)]);
}

/// Process-wide arbiter of cache pages and threads.
///
/// All calls are point-in-time critical sections; implementations must be
/// safe to share between statements running on different threads.
pub trait ResourceGovernor: Send + Sync {
    /// Returns false and changes nothing if the new knob would under-commit
    /// pages already assigned.
    fn set_resource_knob(&self, knobs: &ResourceKnobs, kind: KnobKind) -> bool;

    /// Returns false and changes nothing under the same condition.
    fn set_resource_availability(&self, total: &ResourceQuantity, kind: ResourceType) -> bool;

    /// Grant every stream of `graph` at least its minimum, or fail without
    /// granting anything.
    fn request_resources(&self, graph: &mut dyn ResourceDemand) -> Result<()>;

    /// Release whatever `graph` holds. Unknown graphs are ignored.
    fn return_resources(&self, graph: GraphId);

    fn write_stats(&self, target: &mut dyn StatsTarget);
}
