//! Provisioning adapters spliced in by the graph builder.
//!
//! | producer supplies | consumer expects | adapter |
//! |---|---|---|
//! | its own memory | to supply memory | `CopyAdapter` |
//! | nothing (wants a region) | the producer's memory | `HoldAdapter` |

use xflow_core::resource::ResourceRequirements;
use xflow_mem::PageGuard;

use crate::buffer::BufProvision;
use crate::conduit;
use crate::context::{OpenContext, PrepareContext, StreamContext};
use crate::traits::{ExecResult, ExecStream, OpError, Quantum};

/// Which adapter reconciles `output` (what the producer supplies) with
/// `required` (what the consumer expects). `None` if they already agree.
pub fn adapter_kind(output: BufProvision, required: BufProvision) -> Option<&'static str> {
    match (output, required) {
        (BufProvision::Producer, BufProvision::Consumer) => Some(CopyAdapter::KIND),
        (BufProvision::Consumer, BufProvision::Producer) => Some(HoldAdapter::KIND),
        _ => None,
    }
}

pub fn new_adapter(kind: &str) -> Option<Box<dyn ExecStream>> {
    match kind {
        CopyAdapter::KIND => Some(Box::new(CopyAdapter)),
        HoldAdapter::KIND => Some(Box::new(HoldAdapter::new())),
        _ => None,
    }
}

fn pass_through_shape(ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
    ctx.expect_arity(1, 1)?;
    let desc = ctx.input_desc(0)?.clone();
    ctx.set_output_desc(0, desc)
}

/// Reads the producer's pages and copies each tuple into the region the
/// consumer offers.
#[derive(Debug, Default)]
pub struct CopyAdapter;

impl CopyAdapter {
    pub const KIND: &'static str = "copy";
}

impl ExecStream for CopyAdapter {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
        pass_through_shape(ctx)
    }

    fn open(&mut self, _ctx: &mut OpenContext<'_>, _restart: bool) -> Result<(), OpError> {
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StreamContext<'_>,
        quantum: &Quantum,
    ) -> Result<ExecResult, OpError> {
        let (inp, out) = ctx.io(0, 0);
        conduit::pump(inp, out, quantum, |_| Ok(true))
    }
}

/// Owns one scratch page: offers it upstream as the producer's region and
/// hands the filled page downstream as its own memory.
#[derive(Debug, Default)]
pub struct HoldAdapter {
    page: Option<PageGuard>,
}

impl HoldAdapter {
    pub const KIND: &'static str = "scratch_buffer";

    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecStream for HoldAdapter {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
        pass_through_shape(ctx)
    }

    fn resource_requirements(&self) -> ResourceRequirements {
        ResourceRequirements::accurate(1, 1)
    }

    fn open(&mut self, ctx: &mut OpenContext<'_>, _restart: bool) -> Result<(), OpError> {
        if self.page.is_none() {
            self.page = Some(ctx.scratch().allocate_page()?);
        }
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StreamContext<'_>,
        _quantum: &Quantum,
    ) -> Result<ExecResult, OpError> {
        let region = self
            .page
            .as_ref()
            .map(PageGuard::size)
            .ok_or_else(|| OpError::Exec(format!("{}: executed before open", ctx.name())))?;
        let (inp, out) = ctx.io(0, 0);
        Ok(conduit::forward_page(inp, out, Some(region)))
    }

    fn close(&mut self) {
        self.page = None;
    }

    fn output_buf_provision(&self) -> BufProvision {
        BufProvision::Producer
    }

    fn input_buf_requirement(&self) -> BufProvision {
        BufProvision::Consumer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_provisions_need_no_adapter() {
        use BufProvision::{Consumer, Producer};
        assert_eq!(adapter_kind(Producer, Producer), None);
        assert_eq!(adapter_kind(Consumer, Consumer), None);
        assert_eq!(adapter_kind(BufProvision::None, Consumer), None);
        assert_eq!(adapter_kind(Producer, Consumer), Some("copy"));
        assert_eq!(adapter_kind(Consumer, Producer), Some("scratch_buffer"));
    }

    #[test]
    fn adapters_declare_their_sides() {
        let copy = new_adapter("copy").unwrap();
        assert_eq!(copy.input_buf_requirement(), BufProvision::Producer);
        assert_eq!(copy.output_buf_provision(), BufProvision::Consumer);
        let hold = new_adapter("scratch_buffer").unwrap();
        assert_eq!(hold.input_buf_requirement(), BufProvision::Consumer);
        assert_eq!(hold.output_buf_provision(), BufProvision::Producer);
        assert_eq!(hold.resource_requirements(), ResourceRequirements::accurate(1, 1));
        assert!(new_adapter("values").is_none());
    }
}
