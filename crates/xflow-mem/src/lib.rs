#![forbid(unsafe_code)]
//! xflow-mem: cache pages and the resource governor.
//!
//! Concrete implementations of the resource contracts in
//! `xflow-core::resource`:
//! - `PagePool` / `PageGuard`: the shared scratch pool, RAII page accounting
//! - `QuotaPageAccessor`: per-stream view of the pool capped by its grant
//! - `SimpleGovernor`: sqrt-weighted arbitration of pages across graphs
//!
//! Streams never talk to the governor; only the statement layer does.

pub mod allocation;
pub mod error;
pub mod governor;
pub mod page;
pub mod tracking;

pub use allocation::{distribute_pages, PageDemand};
pub use error::{Error, Result};
pub use governor::{GrantLease, SimpleGovernor};
pub use page::{PageGuard, PagePool, QuotaPageAccessor};
