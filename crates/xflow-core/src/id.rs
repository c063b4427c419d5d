//! Strongly-typed identifiers used across the engine.
//!
//! Streams and buffers are addressed by index into the arena owned by their
//! graph, so their ids are only meaningful together with that graph.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(StreamId);
new_id!(BufferId);
new_id!(GraphId);
new_id!(DynamicParamId);

impl StreamId {
    /// Arena slot of this stream inside its graph.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl BufferId {
    /// Arena slot of this buffer inside its graph.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

static NEXT_GRAPH: AtomicU64 = AtomicU64::new(1);

impl GraphId {
    /// Allocate a process-unique graph id. The governor keys grants by it.
    pub fn next() -> Self {
        Self(NEXT_GRAPH.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_ids_are_unique() {
        let a = GraphId::next();
        let b = GraphId::next();
        assert_ne!(a, b);
        assert_eq!(StreamId::new(3).index(), 3);
        assert_eq!(format!("{}", BufferId::new(7)), "BufferId(7)");
    }
}
