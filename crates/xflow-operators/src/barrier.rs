//! N-input barrier: drains every input to EOS, then emits one row with the
//! total number of rows seen.

use serde::Deserialize;

use xflow_core::tuple::{DataType, Datum, Tuple, TupleDesc};

use crate::buffer::BufState;
use crate::context::{OpenContext, PrepareContext, StreamContext};
use crate::params::parse_params;
use crate::traits::{ExecResult, ExecStream, OpError, Quantum};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BarrierParams {
    #[serde(default)]
    column: Option<String>,
}

#[derive(Debug)]
pub struct Barrier {
    column: String,
    rows: i64,
    emitted: bool,
}

impl Barrier {
    pub const KIND: &'static str = "barrier";

    pub fn new() -> Self {
        Self {
            column: "count".into(),
            rows: 0,
            emitted: false,
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: BarrierParams = parse_params(Self::KIND, params)?;
        let mut b = Self::new();
        if let Some(c) = p.column {
            b.column = c;
        }
        Ok(b)
    }
}

impl Default for Barrier {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecStream for Barrier {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
        if ctx.input_count() == 0 || ctx.output_count() != 1 {
            return Err(OpError::Plan(format!(
                "{}: barrier needs at least one input and exactly one output",
                ctx.name()
            )));
        }
        ctx.set_output_desc(0, TupleDesc::single(self.column.clone(), DataType::Int64))
    }

    fn open(&mut self, _ctx: &mut OpenContext<'_>, _restart: bool) -> Result<(), OpError> {
        self.rows = 0;
        self.emitted = false;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StreamContext<'_>,
        quantum: &Quantum,
    ) -> Result<ExecResult, OpError> {
        if self.emitted {
            let out = ctx.output(0);
            if out.state() != BufState::Eos && !out.has_pending_eos() {
                out.mark_eos();
            }
            return Ok(ExecResult::Eos);
        }

        let mut budget = quantum.max_tuples;
        for k in 0..ctx.input_count() {
            let inp = ctx.input(k);
            loop {
                match inp.state() {
                    BufState::Eos => break,
                    BufState::Empty | BufState::Underflow => {
                        inp.request_production();
                        return Ok(ExecResult::Underflow);
                    }
                    BufState::NonEmpty | BufState::Overflow => {
                        if budget == 0 {
                            return Ok(ExecResult::QuantumExpired);
                        }
                        if inp.consume_tuple().is_some() {
                            self.rows += 1;
                            budget -= 1;
                        }
                    }
                }
            }
        }

        let out = ctx.output(0);
        out.produce_tuple(Tuple::new(vec![Datum::Int64(self.rows)]))?;
        self.emitted = true;
        out.mark_eos();
        Ok(ExecResult::Eos)
    }
}
