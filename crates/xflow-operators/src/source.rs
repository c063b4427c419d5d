//! Literal row source.

use serde::Deserialize;

use xflow_core::tuple::{AttrDesc, DataType, Datum, Tuple, TupleDesc};

use crate::buffer::{BufProvision, BufState};
use crate::context::{OpenContext, PrepareContext, StreamContext};
use crate::params::parse_params;
use crate::traits::{ExecResult, ExecStream, OpError, Quantum};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValuesParams {
    #[serde(default)]
    columns: Vec<AttrDesc>,
    #[serde(default)]
    rows: Vec<serde_json::Value>,
    /// Generate `0..count` into a single int64 column instead of `rows`.
    #[serde(default)]
    count: Option<u64>,
    #[serde(default)]
    provision: Option<BufProvision>,
}

/// Emits a fixed set of rows, then EOS.
///
/// With producer provisioning (the default) rows go downstream one page at a
/// time; with consumer provisioning they are written into whatever region the
/// consumer offers.
#[derive(Debug)]
pub struct ValuesSource {
    desc: TupleDesc,
    rows: Vec<Tuple>,
    provision: BufProvision,
    next: usize,
    page_size: usize,
}

impl ValuesSource {
    pub const KIND: &'static str = "values";

    pub fn new(desc: TupleDesc, rows: Vec<Tuple>) -> Self {
        Self {
            desc,
            rows,
            provision: BufProvision::Producer,
            next: 0,
            page_size: 0,
        }
    }

    /// `0..count` as int64 column `n`.
    pub fn counting(count: u64) -> Self {
        let rows = (0..count)
            .map(|i| Tuple::new(vec![Datum::Int64(i as i64)]))
            .collect();
        Self::new(TupleDesc::single("n", DataType::Int64), rows)
    }

    pub fn with_provision(mut self, provision: BufProvision) -> Self {
        self.provision = provision;
        self
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: ValuesParams = parse_params(Self::KIND, params)?;
        let source = match p.count {
            Some(count) => {
                if !p.rows.is_empty() {
                    return Err(OpError::Plan("values: give either rows or count".into()));
                }
                Self::counting(count)
            }
            None => {
                if p.columns.is_empty() {
                    return Err(OpError::Plan("values: columns are required with rows".into()));
                }
                let desc = TupleDesc::new(p.columns);
                let rows = p
                    .rows
                    .iter()
                    .map(|r| Tuple::from_json(r, &desc))
                    .collect::<Result<Vec<_>, _>>()?;
                Self::new(desc, rows)
            }
        };
        Ok(source.with_provision(p.provision.unwrap_or(BufProvision::Producer)))
    }

    fn remaining(&self) -> usize {
        self.rows.len() - self.next
    }

    fn next_page(&mut self, quantum: &Quantum) -> Vec<Tuple> {
        let mut page = Vec::new();
        let mut bytes = 0usize;
        while self.next < self.rows.len() && (page.len() as u64) < u64::from(quantum.max_tuples) {
            let len = self.rows[self.next].encoded_len();
            if !page.is_empty() && bytes + len > self.page_size {
                break;
            }
            bytes += len;
            page.push(self.rows[self.next].clone());
            self.next += 1;
        }
        page
    }
}

impl ExecStream for ValuesSource {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
        ctx.expect_arity(0, 1)?;
        ctx.set_output_desc(0, self.desc.clone())
    }

    fn open(&mut self, ctx: &mut OpenContext<'_>, _restart: bool) -> Result<(), OpError> {
        self.next = 0;
        self.page_size = ctx.page_size();
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StreamContext<'_>,
        quantum: &Quantum,
    ) -> Result<ExecResult, OpError> {
        let out = ctx.output(0);
        if out.state() == BufState::Eos || out.has_pending_eos() {
            return Ok(ExecResult::Eos);
        }
        if out.state() == BufState::Overflow {
            return Ok(ExecResult::Overflow);
        }

        match out.provision() {
            BufProvision::Consumer => {
                let mut budget = quantum.max_tuples;
                while self.remaining() > 0 {
                    if budget == 0 {
                        return Ok(ExecResult::QuantumExpired);
                    }
                    if !out.produce_tuple(self.rows[self.next].clone())? {
                        return Ok(ExecResult::Overflow);
                    }
                    self.next += 1;
                    budget -= 1;
                }
                out.mark_eos();
                Ok(ExecResult::Eos)
            }
            _ => {
                if out.is_consumption_possible() {
                    return Ok(ExecResult::Overflow);
                }
                if self.remaining() == 0 {
                    out.mark_eos();
                    return Ok(ExecResult::Eos);
                }
                let page = self.next_page(quantum);
                out.provide_buffer_for_consumption(page);
                Ok(ExecResult::Overflow)
            }
        }
    }

    fn output_buf_provision(&self) -> BufProvision {
        self.provision
    }
}
