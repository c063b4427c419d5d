//! Per-call handles given to streams.
//!
//! These replace a stored back-pointer to the owning graph: a handle only
//! lives for the duration of one `prepare`/`open`/`execute` call.

use xflow_core::abort::AbortFlag;
use xflow_core::dynamic::DynamicParamManager;
use xflow_core::id::BufferId;
use xflow_core::target::{ErrorLevel, ErrorRecord, ErrorTarget};
use xflow_core::tuple::{Tuple, TupleDesc};
use xflow_mem::QuotaPageAccessor;

use crate::buffer::BufAccessor;
use crate::traits::OpError;

/// Input shapes in, output shapes out.
pub struct PrepareContext<'a> {
    name: &'a str,
    inputs: &'a [TupleDesc],
    outputs: Vec<Option<TupleDesc>>,
    params: &'a DynamicParamManager,
}

impl<'a> PrepareContext<'a> {
    pub fn new(
        name: &'a str,
        inputs: &'a [TupleDesc],
        output_count: usize,
        params: &'a DynamicParamManager,
    ) -> Self {
        Self {
            name,
            inputs,
            outputs: vec![None; output_count],
            params,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_desc(&self, ordinal: usize) -> Result<&TupleDesc, OpError> {
        self.inputs
            .get(ordinal)
            .ok_or_else(|| OpError::Plan(format!("{}: no input #{ordinal}", self.name)))
    }

    pub fn params(&self) -> &DynamicParamManager {
        self.params
    }

    pub fn set_output_desc(&mut self, ordinal: usize, desc: TupleDesc) -> Result<(), OpError> {
        let name = self.name;
        let slot = self
            .outputs
            .get_mut(ordinal)
            .ok_or_else(|| OpError::Plan(format!("{name}: no output #{ordinal}")))?;
        *slot = Some(desc);
        Ok(())
    }

    /// Same shape on every output.
    pub fn set_all_output_descs(&mut self, desc: &TupleDesc) {
        for slot in &mut self.outputs {
            *slot = Some(desc.clone());
        }
    }

    /// Require exactly `inputs` inputs and `outputs` outputs.
    pub fn expect_arity(&self, inputs: usize, outputs: usize) -> Result<(), OpError> {
        if self.inputs.len() != inputs || self.outputs.len() != outputs {
            return Err(OpError::Plan(format!(
                "{}: expects {inputs} input(s) and {outputs} output(s), wired with {} and {}",
                self.name,
                self.inputs.len(),
                self.outputs.len()
            )));
        }
        Ok(())
    }

    pub fn into_outputs(self) -> Vec<Option<TupleDesc>> {
        self.outputs
    }
}

pub struct OpenContext<'a> {
    name: &'a str,
    scratch: &'a QuotaPageAccessor,
    params: &'a DynamicParamManager,
}

impl<'a> OpenContext<'a> {
    pub fn new(
        name: &'a str,
        scratch: &'a QuotaPageAccessor,
        params: &'a DynamicParamManager,
    ) -> Self {
        Self {
            name,
            scratch,
            params,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn scratch(&self) -> &QuotaPageAccessor {
        self.scratch
    }

    pub fn page_size(&self) -> usize {
        self.scratch.page_size()
    }

    pub fn params(&self) -> &DynamicParamManager {
        self.params
    }
}

/// Everything one `execute` call may touch.
pub struct StreamContext<'a> {
    name: &'a str,
    buffers: &'a mut [BufAccessor],
    inputs: &'a [BufferId],
    outputs: &'a [BufferId],
    params: &'a DynamicParamManager,
    errors: &'a dyn ErrorTarget,
    abort: &'a AbortFlag,
}

impl<'a> StreamContext<'a> {
    pub fn new(
        name: &'a str,
        buffers: &'a mut [BufAccessor],
        inputs: &'a [BufferId],
        outputs: &'a [BufferId],
        params: &'a DynamicParamManager,
        errors: &'a dyn ErrorTarget,
        abort: &'a AbortFlag,
    ) -> Self {
        Self {
            name,
            buffers,
            inputs,
            outputs,
            params,
            errors,
            abort,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&mut self, ordinal: usize) -> &mut BufAccessor {
        &mut self.buffers[self.inputs[ordinal].index()]
    }

    pub fn output(&mut self, ordinal: usize) -> &mut BufAccessor {
        &mut self.buffers[self.outputs[ordinal].index()]
    }

    /// Input and output at the same time.
    pub fn io(&mut self, input: usize, output: usize) -> (&mut BufAccessor, &mut BufAccessor) {
        let a = self.inputs[input].index();
        let b = self.outputs[output].index();
        pair_mut(self.buffers, a, b)
    }

    pub fn params(&self) -> &DynamicParamManager {
        self.params
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Fail with `OpError::Aborted` if the statement was cancelled.
    pub fn check_abort(&self) -> Result<(), OpError> {
        if self.abort.is_aborted() {
            return Err(OpError::Aborted);
        }
        Ok(())
    }

    /// Divert `row` to the error target.
    pub fn post_error(&self, level: ErrorLevel, message: impl Into<String>, row: Option<Tuple>) {
        self.errors.notify_error(ErrorRecord {
            source: self.name.to_string(),
            level,
            message: message.into(),
            row,
        });
    }
}

fn pair_mut(
    buffers: &mut [BufAccessor],
    a: usize,
    b: usize,
) -> (&mut BufAccessor, &mut BufAccessor) {
    assert_ne!(a, b, "a stream cannot read and write the same buffer");
    if a < b {
        let (lo, hi) = buffers.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = buffers.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufProvision, BufState};
    use xflow_core::target::NullErrorTarget;

    #[test]
    fn io_splits_in_either_order() {
        let mut bufs = vec![
            BufAccessor::new(BufProvision::Producer),
            BufAccessor::new(BufProvision::Producer),
        ];
        let params = DynamicParamManager::new();
        let abort = AbortFlag::new();
        let errors = NullErrorTarget;
        let inputs = [BufferId::new(1)];
        let outputs = [BufferId::new(0)];
        let mut ctx =
            StreamContext::new("s", &mut bufs, &inputs, &outputs, &params, &errors, &abort);
        let (inp, out) = ctx.io(0, 0);
        inp.request_production();
        out.mark_eos();
        assert_eq!(bufs[1].state(), BufState::Underflow);
        assert_eq!(bufs[0].state(), BufState::Eos);
    }

    #[test]
    fn prepare_context_checks_arity() {
        let params = DynamicParamManager::new();
        let descs = [TupleDesc::default()];
        let ctx = PrepareContext::new("f", &descs, 1, &params);
        assert!(ctx.expect_arity(1, 1).is_ok());
        assert!(ctx.expect_arity(2, 1).is_err());
    }
}
