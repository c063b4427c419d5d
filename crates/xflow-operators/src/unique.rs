//! Key uniqueness check with a violation channel.
//!
//! A row whose key was already seen is dropped from the main output and
//! posted, with the row attached, to the graph's error target.

use std::collections::HashSet;

use serde::Deserialize;

use xflow_core::target::ErrorLevel;
use xflow_core::tuple::Tuple;

use crate::conduit;
use crate::context::{OpenContext, PrepareContext, StreamContext};
use crate::params::parse_params;
use crate::traits::{ExecResult, ExecStream, OpError, Quantum};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UniqueParams {
    column: String,
    #[serde(default)]
    fail_on_duplicate: bool,
}

#[derive(Debug)]
pub struct UniqueFilter {
    column: String,
    col_idx: usize,
    fail_on_duplicate: bool,
    seen: HashSet<String>,
    violations: u64,
}

impl UniqueFilter {
    pub const KIND: &'static str = "unique";

    pub fn new(column: impl Into<String>, fail_on_duplicate: bool) -> Self {
        Self {
            column: column.into(),
            col_idx: 0,
            fail_on_duplicate,
            seen: HashSet::new(),
            violations: 0,
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: UniqueParams = parse_params(Self::KIND, params)?;
        Ok(Self::new(p.column, p.fail_on_duplicate))
    }

    /// Rows diverted since the last open.
    pub fn violations(&self) -> u64 {
        self.violations
    }
}

impl ExecStream for UniqueFilter {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
        ctx.expect_arity(1, 1)?;
        let desc = ctx.input_desc(0)?.clone();
        self.col_idx = desc.index_of(&self.column).ok_or_else(|| {
            OpError::Schema(format!("{}: column '{}' not found", ctx.name(), self.column))
        })?;
        ctx.set_output_desc(0, desc)
    }

    fn open(&mut self, _ctx: &mut OpenContext<'_>, _restart: bool) -> Result<(), OpError> {
        self.seen.clear();
        self.violations = 0;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StreamContext<'_>,
        quantum: &Quantum,
    ) -> Result<ExecResult, OpError> {
        let idx = self.col_idx;
        let fail = self.fail_on_duplicate;
        let mut diverted: Vec<Tuple> = Vec::new();
        let result = {
            let seen = &mut self.seen;
            let (inp, out) = ctx.io(0, 0);
            conduit::pump(inp, out, quantum, |t: &Tuple| {
                let key = t.get(idx).map(|d| format!("{d:?}")).unwrap_or_default();
                if seen.insert(key) {
                    return Ok(true);
                }
                if fail {
                    return Err(OpError::Exec(format!("duplicate key in row {t}")));
                }
                diverted.push(t.clone());
                Ok(false)
            })
        };
        for row in diverted {
            self.violations += 1;
            #[cfg(feature = "tracing")]
            tracing::debug!(stream = ctx.name(), row = %row, "unique violation");
            ctx.post_error(
                ErrorLevel::Warning,
                format!("duplicate value in column '{}'", self.column),
                Some(row),
            );
        }
        result
    }

    fn close(&mut self) {
        self.seen.clear();
    }
}
