//! Shared buffer choreography for one-input/one-output streams.

use xflow_core::tuple::Tuple;

use crate::buffer::{BufAccessor, BufProvision, BufState};
use crate::traits::{ExecResult, OpError, Quantum};

/// State checks every pass-through stream performs before touching data.
///
/// `None` means input is readable and output can take tuples.
pub fn precheck(
    inp: &mut BufAccessor,
    out: &mut BufAccessor,
) -> Result<Option<ExecResult>, OpError> {
    if out.state() == BufState::Eos || out.has_pending_eos() {
        return Ok(Some(ExecResult::Eos));
    }
    if out.state() == BufState::Overflow {
        return Ok(Some(ExecResult::Overflow));
    }
    if inp.state() == BufState::Eos {
        out.mark_eos();
        return Ok(Some(ExecResult::Eos));
    }
    if !inp.is_consumption_possible() {
        inp.request_production();
        return Ok(Some(ExecResult::Underflow));
    }
    if out.provision() == BufProvision::Consumer && out.capacity_bytes() == 0 {
        return Err(OpError::Exec(
            "output buffer has no region; the consumer must provide one first".into(),
        ));
    }
    Ok(None)
}

/// What to report once the input has been drained.
pub fn after_drain(inp: &mut BufAccessor, out: &mut BufAccessor) -> ExecResult {
    if inp.state() == BufState::Eos {
        out.mark_eos();
        return ExecResult::Eos;
    }
    if out.is_consumption_possible() {
        out.request_consumption();
        return ExecResult::Overflow;
    }
    inp.request_production();
    ExecResult::Underflow
}

/// Move tuples from `inp` into the consumer-provided region of `out`,
/// keeping those `keep` accepts, until a side blocks or the quantum runs out.
///
/// `keep` sees each input tuple exactly once.
pub fn pump<F>(
    inp: &mut BufAccessor,
    out: &mut BufAccessor,
    quantum: &Quantum,
    mut keep: F,
) -> Result<ExecResult, OpError>
where
    F: FnMut(&Tuple) -> Result<bool, OpError>,
{
    if let Some(result) = precheck(inp, out)? {
        return Ok(result);
    }
    let mut budget = quantum.max_tuples;
    while inp.is_consumption_possible() {
        if budget == 0 {
            return Ok(ExecResult::QuantumExpired);
        }
        let Some(next) = inp.peek_tuple() else {
            break;
        };
        if next.encoded_len() > out.space_left() && out.is_consumption_possible() {
            out.request_consumption();
            return Ok(ExecResult::Overflow);
        }
        let Some(tuple) = inp.consume_tuple() else {
            break;
        };
        budget -= 1;
        if keep(&tuple)? {
            out.produce_tuple(tuple)?;
        }
    }
    Ok(after_drain(inp, out))
}

/// Hand whole pages from `inp` to a producer-provisioned `out`.
///
/// With `region` set the input is consumer-provisioned and a region of that
/// many bytes is offered upstream whenever it runs dry.
pub fn forward_page(
    inp: &mut BufAccessor,
    out: &mut BufAccessor,
    region: Option<usize>,
) -> ExecResult {
    if out.state() == BufState::Eos || out.has_pending_eos() {
        return ExecResult::Eos;
    }
    if out.is_consumption_possible() {
        return ExecResult::Overflow;
    }
    match inp.state() {
        BufState::Eos => {
            out.mark_eos();
            ExecResult::Eos
        }
        BufState::NonEmpty | BufState::Overflow => {
            let rows = inp.consume_all();
            out.provide_buffer_for_consumption(rows);
            if inp.state() == BufState::Eos {
                out.mark_eos();
            }
            if out.is_consumption_possible() {
                ExecResult::Overflow
            } else {
                ExecResult::Eos
            }
        }
        BufState::Empty | BufState::Underflow => {
            match region {
                Some(bytes) => inp.provide_buffer_for_production(bytes),
                None => inp.request_production(),
            }
            ExecResult::Underflow
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xflow_core::tuple::Datum;

    fn row(v: i64) -> Tuple {
        Tuple::new(vec![Datum::Int64(v)])
    }

    #[test]
    fn pump_filters_and_requests_more() {
        let mut inp = BufAccessor::new(BufProvision::Producer);
        let mut out = BufAccessor::new(BufProvision::Consumer);
        out.provide_buffer_for_production(1024);
        inp.provide_buffer_for_consumption(vec![row(1), row(2), row(3)]);

        let r = pump(&mut inp, &mut out, &Quantum::UNBOUNDED, |t| {
            Ok(t.get(0).and_then(Datum::as_i64) != Some(2))
        })
        .unwrap();
        assert_eq!(r, ExecResult::Overflow);
        assert_eq!(out.consume_all(), vec![row(1), row(3)]);
        assert_eq!(inp.state(), BufState::Empty);
    }

    #[test]
    fn pump_honors_quantum() {
        let mut inp = BufAccessor::new(BufProvision::Producer);
        let mut out = BufAccessor::new(BufProvision::Consumer);
        out.provide_buffer_for_production(1024);
        inp.provide_buffer_for_consumption((0..5).map(row).collect());

        let q = Quantum::tuples(2);
        assert_eq!(
            pump(&mut inp, &mut out, &q, |_| Ok(true)).unwrap(),
            ExecResult::QuantumExpired
        );
        assert_eq!(out.available_tuples(), 2);
        assert_eq!(
            pump(&mut inp, &mut out, &q, |_| Ok(true)).unwrap(),
            ExecResult::QuantumExpired
        );
        assert_eq!(
            pump(&mut inp, &mut out, &q, |_| Ok(true)).unwrap(),
            ExecResult::Overflow
        );
        assert_eq!(out.available_tuples(), 5);
    }

    #[test]
    fn pump_stops_when_region_is_full() {
        let one = row(0).encoded_len();
        let mut inp = BufAccessor::new(BufProvision::Producer);
        let mut out = BufAccessor::new(BufProvision::Consumer);
        out.provide_buffer_for_production(one * 2);
        inp.provide_buffer_for_consumption((0..3).map(row).collect());

        let r = pump(&mut inp, &mut out, &Quantum::UNBOUNDED, |_| Ok(true)).unwrap();
        assert_eq!(r, ExecResult::Overflow);
        assert_eq!(out.state(), BufState::Overflow);
        assert_eq!(inp.available_tuples(), 1);
    }

    #[test]
    fn eos_propagates_through_pump() {
        let mut inp = BufAccessor::new(BufProvision::Producer);
        let mut out = BufAccessor::new(BufProvision::Consumer);
        out.provide_buffer_for_production(1024);
        inp.provide_buffer_for_consumption(vec![row(9)]);
        inp.mark_eos();

        let r = pump(&mut inp, &mut out, &Quantum::UNBOUNDED, |_| Ok(true)).unwrap();
        assert_eq!(r, ExecResult::Eos);
        assert!(out.has_pending_eos());
        assert_eq!(out.consume_all(), vec![row(9)]);
        assert_eq!(out.state(), BufState::Eos);
    }

    #[test]
    fn forward_page_offers_region_upstream() {
        let mut inp = BufAccessor::new(BufProvision::Consumer);
        let mut out = BufAccessor::new(BufProvision::Producer);
        assert_eq!(forward_page(&mut inp, &mut out, Some(256)), ExecResult::Underflow);
        assert_eq!(inp.capacity_bytes(), 256);
        inp.produce_tuple(row(4)).unwrap();
        assert_eq!(forward_page(&mut inp, &mut out, Some(256)), ExecResult::Overflow);
        assert_eq!(out.consume_all(), vec![row(4)]);
    }
}
