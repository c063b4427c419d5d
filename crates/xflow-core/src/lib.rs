#![forbid(unsafe_code)]
//! xflow-core: shared vocabulary for the xflow dataflow engine.
//!
//! This crate holds the pieces every other crate agrees on:
//! - strongly-typed ids for streams, buffers, graphs and dynamic parameters
//! - the tuple model that flows through buffers
//! - resource quantities and the `ResourceGovernor` / `ResourceDemand` contracts
//! - engine configuration, graph descriptions, run reports and hashing
//! - the `DynamicParamManager` shared between streams of one execution context
//!
//! No scheduling, buffering, or allocation policy lives here. Those live in
//! `xflow-operators`, `xflow-exec` and `xflow-mem` respectively.

pub mod abort;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod hash;
pub mod id;
pub mod plan;
pub mod prelude;
pub mod report;
pub mod resource;
pub mod target;
pub mod tuple;

/// Engine version string recorded in run reports.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
