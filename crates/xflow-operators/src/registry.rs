//! Kind name -> stream constructor.
//!
//! Graph builders only know kind names and JSON params; this is where those
//! turn into boxed streams.

use std::collections::BTreeMap;

use crate::adapter::{CopyAdapter, HoldAdapter};
use crate::barrier::Barrier;
use crate::count::RowCount;
use crate::filter::FilterStream;
use crate::mock::{Forward, MockResourceStream};
use crate::source::ValuesSource;
use crate::splitter::Splitter;
use crate::traits::{ExecStream, OpError};
use crate::unique::UniqueFilter;

pub type StreamFactory = fn(&serde_json::Value) -> Result<Box<dyn ExecStream>, OpError>;

#[derive(Clone)]
pub struct StreamRegistry {
    factories: BTreeMap<String, StreamFactory>,
}

impl StreamRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Every stream kind shipped with this crate.
    pub fn with_builtins() -> Self {
        let mut r = Self::empty();
        r.register(ValuesSource::KIND, |p| Ok(Box::new(ValuesSource::from_params(p)?)));
        r.register(FilterStream::KIND, |p| Ok(Box::new(FilterStream::from_params(p)?)));
        r.register(UniqueFilter::KIND, |p| Ok(Box::new(UniqueFilter::from_params(p)?)));
        r.register(RowCount::KIND, |p| Ok(Box::new(RowCount::from_params(p)?)));
        r.register(Barrier::KIND, |p| Ok(Box::new(Barrier::from_params(p)?)));
        r.register(Splitter::KIND, |_| Ok(Box::new(Splitter::new())));
        r.register(MockResourceStream::KIND, |p| {
            Ok(Box::new(MockResourceStream::from_params(p)?))
        });
        r.register(Forward::KIND, |p| Ok(Box::new(Forward::from_params(p)?)));
        r.register(CopyAdapter::KIND, |_| Ok(Box::new(CopyAdapter)));
        r.register(HoldAdapter::KIND, |_| Ok(Box::new(HoldAdapter::new())));
        r
    }

    /// Later registrations replace earlier ones.
    pub fn register(&mut self, kind: &str, factory: StreamFactory) {
        self.factories.insert(kind.to_string(), factory);
    }

    pub fn create(&self, kind: &str, params: &serde_json::Value) -> Result<Box<dyn ExecStream>, OpError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| OpError::Plan(format!("unknown stream kind '{kind}'")))?;
        factory(params)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_are_registered() {
        let r = StreamRegistry::with_builtins();
        let kinds: Vec<&str> = r.kinds().collect();
        assert_eq!(
            kinds,
            vec![
                "barrier",
                "copy",
                "filter",
                "forward",
                "mock_resource",
                "row_count",
                "scratch_buffer",
                "splitter",
                "unique",
                "values"
            ]
        );
        let s = r.create("values", &json!({"count": 3})).unwrap();
        assert_eq!(s.kind(), "values");
    }

    #[test]
    fn unknown_kind_is_a_plan_error() {
        let r = StreamRegistry::with_builtins();
        assert!(matches!(
            r.create("btree_search", &json!({})),
            Err(OpError::Plan(_))
        ));
    }
}
