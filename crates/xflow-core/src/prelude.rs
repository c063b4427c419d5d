//! Convenient re-exports for downstream crates.

pub use crate::abort::AbortFlag;
pub use crate::config::EngineConfig;
pub use crate::dynamic::DynamicParamManager;
pub use crate::error::{Error, Result};
pub use crate::id::{BufferId, DynamicParamId, GraphId, StreamId};
pub use crate::plan::{DataflowDef, GraphDef, StreamDef};
pub use crate::report::RunReport;
pub use crate::resource::{
    KnobKind, ResourceDemand, ResourceGovernor, ResourceKnobs, ResourceQuantity,
    ResourceRequirements, ResourceSettingType, ResourceType, StreamRequirement,
};
pub use crate::target::{ErrorLevel, ErrorRecord, ErrorTarget, StatsTarget};
pub use crate::tuple::{AttrDesc, DataType, Datum, Tuple, TupleDesc};
