//! Streams for tests, demos and the CLI.
//!
//! `MockProducer` is the literal source; `Forward` is a minimal reader whose
//! input provisioning is configurable; `MockResourceStream` declares
//! arbitrary resource requirements and really holds what it is granted.

use serde::Deserialize;

use xflow_core::resource::{
    ResourceQuantity, ResourceRequirements, ResourceSettingType,
};
use xflow_core::tuple::{DataType, Datum, Tuple, TupleDesc};
use xflow_mem::PageGuard;

use crate::buffer::{BufProvision, BufState};
use crate::conduit;
use crate::context::{OpenContext, PrepareContext, StreamContext};
use crate::params::parse_params;
use crate::traits::{ExecResult, ExecStream, OpError, Quantum};

pub use crate::barrier::Barrier;
pub use crate::source::ValuesSource as MockProducer;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ForwardParams {
    #[serde(default)]
    input: Option<BufProvision>,
}

/// Hands each input page downstream unchanged, as producer-owned memory.
#[derive(Debug)]
pub struct Forward {
    input: BufProvision,
    region: usize,
}

impl Forward {
    pub const KIND: &'static str = "forward";

    pub fn new(input: BufProvision) -> Self {
        Self { input, region: 0 }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: ForwardParams = parse_params(Self::KIND, params)?;
        Ok(Self::new(p.input.unwrap_or(BufProvision::Producer)))
    }
}

impl ExecStream for Forward {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
        ctx.expect_arity(1, 1)?;
        let desc = ctx.input_desc(0)?.clone();
        ctx.set_output_desc(0, desc)
    }

    fn open(&mut self, ctx: &mut OpenContext<'_>, _restart: bool) -> Result<(), OpError> {
        self.region = ctx.page_size();
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StreamContext<'_>,
        _quantum: &Quantum,
    ) -> Result<ExecResult, OpError> {
        let region = (self.input == BufProvision::Consumer).then_some(self.region);
        let (inp, out) = ctx.io(0, 0);
        Ok(conduit::forward_page(inp, out, region))
    }

    fn output_buf_provision(&self) -> BufProvision {
        BufProvision::Producer
    }

    fn input_buf_requirement(&self) -> BufProvision {
        self.input
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MockResourceParams {
    min: u32,
    #[serde(default)]
    opt: Option<u32>,
    #[serde(default)]
    setting: ResourceSettingType,
    #[serde(default)]
    threads: u32,
}

/// Source of one row: the number of scratch pages it managed to hold.
#[derive(Debug)]
pub struct MockResourceStream {
    requirements: ResourceRequirements,
    granted: ResourceQuantity,
    pages: Vec<PageGuard>,
    emitted: bool,
}

impl MockResourceStream {
    pub const KIND: &'static str = "mock_resource";

    pub fn new(requirements: ResourceRequirements) -> Self {
        Self {
            requirements,
            granted: ResourceQuantity::ZERO,
            pages: Vec::new(),
            emitted: false,
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: MockResourceParams = parse_params(Self::KIND, params)?;
        let opt = p.opt.unwrap_or(p.min);
        if opt < p.min {
            return Err(OpError::Plan(format!(
                "mock_resource: opt {opt} is below min {}",
                p.min
            )));
        }
        let mut req = ResourceRequirements::pages(p.min, opt, p.setting);
        req.min.threads = p.threads;
        req.opt.threads = p.threads;
        Ok(Self::new(req))
    }

    pub fn granted(&self) -> ResourceQuantity {
        self.granted
    }

    pub fn pages_held(&self) -> usize {
        self.pages.len()
    }
}

impl ExecStream for MockResourceStream {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
        ctx.expect_arity(0, 1)?;
        ctx.set_output_desc(0, TupleDesc::single("pages", DataType::Int64))
    }

    fn resource_requirements(&self) -> ResourceRequirements {
        self.requirements
    }

    fn set_resource_allocation(&mut self, granted: ResourceQuantity) -> ResourceQuantity {
        self.granted = granted;
        let keep = granted.cache_pages as usize;
        if self.pages.len() > keep {
            self.pages.truncate(keep);
        }
        ResourceQuantity {
            threads: granted.threads,
            cache_pages: self.pages.len().max(keep) as u32,
        }
    }

    fn open(&mut self, ctx: &mut OpenContext<'_>, _restart: bool) -> Result<(), OpError> {
        self.emitted = false;
        while self.pages.len() < self.granted.cache_pages as usize {
            self.pages.push(ctx.scratch().allocate_page()?);
        }
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StreamContext<'_>,
        _quantum: &Quantum,
    ) -> Result<ExecResult, OpError> {
        let held = self.pages.len() as i64;
        let out = ctx.output(0);
        if out.state() == BufState::Eos || out.has_pending_eos() {
            return Ok(ExecResult::Eos);
        }
        if !self.emitted {
            if !out.produce_tuple(Tuple::new(vec![Datum::Int64(held)]))? {
                return Ok(ExecResult::Overflow);
            }
            self.emitted = true;
        }
        out.mark_eos();
        Ok(ExecResult::Eos)
    }

    fn close(&mut self) {
        self.pages.clear();
    }
}
