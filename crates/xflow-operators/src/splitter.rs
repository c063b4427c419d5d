//! One input replicated page by page to every output.

use crate::buffer::{BufProvision, BufState};
use crate::context::{OpenContext, PrepareContext, StreamContext};
use crate::traits::{ExecResult, ExecStream, OpError, Quantum};

#[derive(Debug, Default)]
pub struct Splitter;

impl Splitter {
    pub const KIND: &'static str = "splitter";

    pub fn new() -> Self {
        Self
    }
}

impl ExecStream for Splitter {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
        if ctx.input_count() != 1 || ctx.output_count() == 0 {
            return Err(OpError::Plan(format!(
                "{}: splitter needs one input and at least one output",
                ctx.name()
            )));
        }
        let desc = ctx.input_desc(0)?.clone();
        ctx.set_all_output_descs(&desc);
        Ok(())
    }

    fn open(&mut self, _ctx: &mut OpenContext<'_>, _restart: bool) -> Result<(), OpError> {
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StreamContext<'_>,
        _quantum: &Quantum,
    ) -> Result<ExecResult, OpError> {
        let outputs = ctx.output_count();
        let mut all_eos = true;
        for k in 0..outputs {
            let out = ctx.output(k);
            if out.is_consumption_possible() {
                // every copy of the last page has to be drained first
                return Ok(ExecResult::Overflow);
            }
            all_eos &= out.state() == BufState::Eos;
        }
        if all_eos {
            return Ok(ExecResult::Eos);
        }

        let inp = ctx.input(0);
        match inp.state() {
            BufState::Eos => {
                for k in 0..outputs {
                    ctx.output(k).mark_eos();
                }
                Ok(ExecResult::Eos)
            }
            BufState::Empty | BufState::Underflow => {
                inp.request_production();
                Ok(ExecResult::Underflow)
            }
            BufState::NonEmpty | BufState::Overflow => {
                let page = inp.consume_all();
                let input_done = inp.state() == BufState::Eos;
                for k in 0..outputs {
                    let out = ctx.output(k);
                    out.provide_buffer_for_consumption(page.clone());
                    if input_done {
                        out.mark_eos();
                    }
                }
                Ok(ExecResult::Overflow)
            }
        }
    }

    fn output_buf_provision(&self) -> BufProvision {
        BufProvision::Producer
    }
}
