//! Pass-through that counts rows into a dynamic parameter.

use serde::Deserialize;

use xflow_core::id::DynamicParamId;
use xflow_core::tuple::{DataType, Datum, Tuple};

use crate::conduit;
use crate::context::{OpenContext, PrepareContext, StreamContext};
use crate::params::parse_params;
use crate::traits::{ExecResult, ExecStream, OpError, Quantum};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RowCountParams {
    param: u64,
}

#[derive(Debug)]
pub struct RowCount {
    param: DynamicParamId,
}

impl RowCount {
    pub const KIND: &'static str = "row_count";

    pub fn new(param: DynamicParamId) -> Self {
        Self { param }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: RowCountParams = parse_params(Self::KIND, params)?;
        Ok(Self::new(DynamicParamId::new(p.param)))
    }
}

impl ExecStream for RowCount {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
        ctx.expect_arity(1, 1)?;
        let desc = ctx.input_desc(0)?.clone();
        ctx.set_output_desc(0, desc)
    }

    fn open(&mut self, ctx: &mut OpenContext<'_>, _restart: bool) -> Result<(), OpError> {
        let params = ctx.params();
        params.create_param(self.param, DataType::Int64, false)?;
        params.write_param(self.param, Datum::Int64(0))?;
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StreamContext<'_>,
        quantum: &Quantum,
    ) -> Result<ExecResult, OpError> {
        let id = self.param;
        let params = ctx.params().clone();
        let (inp, out) = ctx.io(0, 0);
        conduit::pump(inp, out, quantum, |_: &Tuple| {
            params.increment_counter(id)?;
            Ok(true)
        })
    }

    fn dynamic_params_written(&self) -> Vec<DynamicParamId> {
        vec![self.param]
    }
}
