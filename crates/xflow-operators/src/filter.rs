//! Row filter: `column op operand`.
//!
//! The operand is either a literal or a dynamic parameter read on every
//! `execute`, so a filter placed after a parameter writer sees its latest value.

use std::cmp::Ordering;

use serde::Deserialize;

use xflow_core::id::DynamicParamId;
use xflow_core::tuple::{Datum, Tuple, TupleDesc};

use crate::conduit;
use crate::context::{OpenContext, PrepareContext, StreamContext};
use crate::params::parse_params;
use crate::traits::{ExecResult, ExecStream, OpError, Quantum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl CompareOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(serde_json::Value),
    Param(DynamicParamId),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterParams {
    column: String,
    op: CompareOp,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    param: Option<u64>,
}

#[derive(Debug)]
pub struct FilterStream {
    column: String,
    op: CompareOp,
    operand: Operand,
    col_idx: usize,
    literal: Datum,
    desc: TupleDesc,
}

impl FilterStream {
    pub const KIND: &'static str = "filter";

    pub fn new(column: impl Into<String>, op: CompareOp, operand: Operand) -> Self {
        Self {
            column: column.into(),
            op,
            operand,
            col_idx: 0,
            literal: Datum::Null,
            desc: TupleDesc::default(),
        }
    }

    pub fn from_params(params: &serde_json::Value) -> Result<Self, OpError> {
        let p: FilterParams = parse_params(Self::KIND, params)?;
        let operand = match (p.value, p.param) {
            (Some(v), None) => Operand::Literal(v),
            (None, Some(id)) => Operand::Param(DynamicParamId::new(id)),
            _ => {
                return Err(OpError::Plan(
                    "filter: exactly one of value or param is required".into(),
                ))
            }
        };
        Ok(Self::new(p.column, p.op, operand))
    }

    fn operand(&self, ctx: &StreamContext<'_>) -> Result<Datum, OpError> {
        match &self.operand {
            Operand::Literal(_) => Ok(self.literal.clone()),
            Operand::Param(id) => Ok(ctx.params().read_param(*id)?),
        }
    }
}

fn matches(op: CompareOp, value: Option<&Datum>, operand: &Datum) -> bool {
    match value.and_then(|v| v.compare(operand)) {
        Some(ord) => op.holds(ord),
        None => false,
    }
}

impl ExecStream for FilterStream {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> Result<(), OpError> {
        ctx.expect_arity(1, 1)?;
        let desc = ctx.input_desc(0)?.clone();
        self.col_idx = desc.index_of(&self.column).ok_or_else(|| {
            OpError::Schema(format!("{}: column '{}' not found", ctx.name(), self.column))
        })?;
        if let Operand::Literal(v) = &self.operand {
            let ty = desc.attrs[self.col_idx].data_type;
            self.literal = Datum::from_json(v, ty)?;
        }
        ctx.set_output_desc(0, desc.clone())?;
        self.desc = desc;
        Ok(())
    }

    fn open(&mut self, _ctx: &mut OpenContext<'_>, _restart: bool) -> Result<(), OpError> {
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &mut StreamContext<'_>,
        quantum: &Quantum,
    ) -> Result<ExecResult, OpError> {
        let operand = self.operand(ctx)?;
        let (op, idx) = (self.op, self.col_idx);
        let (inp, out) = ctx.io(0, 0);
        conduit::pump(inp, out, quantum, |t: &Tuple| Ok(matches(op, t.get(idx), &operand)))
    }

    fn dynamic_params_read(&self) -> Vec<DynamicParamId> {
        match self.operand {
            Operand::Param(id) => vec![id],
            Operand::Literal(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_and_param_operands() {
        let f = FilterStream::from_params(&json!({"column": "n", "op": ">=", "value": 3})).unwrap();
        assert_eq!(f.operand, Operand::Literal(json!(3)));
        assert!(f.dynamic_params_read().is_empty());

        let g = FilterStream::from_params(&json!({"column": "n", "op": "<", "param": 7})).unwrap();
        assert_eq!(g.dynamic_params_read(), vec![DynamicParamId::new(7)]);

        assert!(FilterStream::from_params(&json!({"column": "n", "op": "<"})).is_err());
        assert!(FilterStream::from_params(&json!({"column": "n", "op": "~", "value": 1})).is_err());
    }

    #[test]
    fn null_never_matches() {
        assert!(!matches(CompareOp::Eq, Some(&Datum::Null), &Datum::Int64(1)));
        assert!(!matches(CompareOp::Ne, None, &Datum::Int64(1)));
        assert!(matches(CompareOp::Le, Some(&Datum::Int64(1)), &Datum::Int64(1)));
        assert!(matches(CompareOp::Gt, Some(&Datum::Float64(1.5)), &Datum::Int64(1)));
    }
}
