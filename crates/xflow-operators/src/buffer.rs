//! The buffer accessor shared by exactly one producer and one consumer.
//!
//! States:
//! - `Eos`: the producer is done; terminal until the graph is reopened
//! - `Empty`: nothing buffered and nobody waiting
//! - `Underflow`: the consumer wants data; the scheduler looks for these
//! - `NonEmpty`: data is ready for the consumer
//! - `Overflow`: the producer is blocked until the consumer drains
//!
//! Who supplies the memory region is fixed per buffer by its provision:
//! with `Producer` the producer hands over a filled region through
//! `provide_buffer_for_consumption`; with `Consumer` the consumer hands an
//! empty region of some capacity through `provide_buffer_for_production` and
//! the producer fills it tuple by tuple.
//!
//! The scheduler guarantees the two sides never run at the same time, so no
//! locking happens here. Calling a method from the wrong state is a bug in
//! the calling stream and panics.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use xflow_core::tuple::{Tuple, TupleDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufState {
    Eos,
    Empty,
    Underflow,
    NonEmpty,
    Overflow,
}

impl fmt::Display for BufState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BufState::Eos => "EOS",
            BufState::Empty => "EMPTY",
            BufState::Underflow => "UNDERFLOW",
            BufState::NonEmpty => "NONEMPTY",
            BufState::Overflow => "OVERFLOW",
        };
        f.write_str(s)
    }
}

/// Which side of a buffer owns the memory region.
///
/// On the output side a stream declares what it supplies; on the input side
/// what it requires. `None` means "either is fine".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufProvision {
    #[default]
    None,
    Producer,
    Consumer,
}

impl fmt::Display for BufProvision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BufProvision::None => "none",
            BufProvision::Producer => "producer",
            BufProvision::Consumer => "consumer",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("tuple of {tuple_bytes} bytes can never fit a {capacity}-byte buffer")]
    TupleOverflow { tuple_bytes: usize, capacity: usize },
}

#[derive(Debug, Clone)]
pub struct BufAccessor {
    state: BufState,
    provision: BufProvision,
    pending_eos: bool,
    desc: Option<TupleDesc>,
    region: Vec<Tuple>,
    read_pos: usize,
    capacity_bytes: usize,
    used_bytes: usize,
    history: Option<Vec<BufState>>,
}

impl Default for BufAccessor {
    fn default() -> Self {
        Self::new(BufProvision::None)
    }
}

impl BufAccessor {
    pub fn new(provision: BufProvision) -> Self {
        Self {
            state: BufState::Empty,
            provision,
            pending_eos: false,
            desc: None,
            region: Vec::new(),
            read_pos: 0,
            capacity_bytes: 0,
            used_bytes: 0,
            history: None,
        }
    }

    pub fn state(&self) -> BufState {
        self.state
    }

    pub fn provision(&self) -> BufProvision {
        self.provision
    }

    pub fn set_provision(&mut self, provision: BufProvision) {
        self.provision = provision;
    }

    pub fn tuple_desc(&self) -> Option<&TupleDesc> {
        self.desc.as_ref()
    }

    pub fn set_tuple_desc(&mut self, desc: TupleDesc) {
        self.desc = Some(desc);
    }

    /// Keep every state this buffer passes through from now on.
    pub fn record_history(&mut self) {
        self.history = Some(vec![self.state]);
    }

    pub fn history(&self) -> &[BufState] {
        self.history.as_deref().unwrap_or(&[])
    }

    fn set_state(&mut self, next: BufState) {
        assert!(
            self.state != BufState::Eos || next == BufState::Eos,
            "buffer left EOS for {next}"
        );
        if next != self.state {
            self.state = next;
            if let Some(h) = self.history.as_mut() {
                h.push(next);
            }
        }
    }

    fn drop_region(&mut self) {
        self.region.clear();
        self.read_pos = 0;
        self.capacity_bytes = 0;
        self.used_bytes = 0;
    }

    /// Back to `Empty` for a fresh open; the only way out of `Eos`.
    pub fn clear(&mut self) {
        self.drop_region();
        self.pending_eos = false;
        if self.state != BufState::Empty {
            self.state = BufState::Empty;
            if let Some(h) = self.history.as_mut() {
                h.push(BufState::Empty);
            }
        }
    }

    pub fn has_pending_eos(&self) -> bool {
        self.pending_eos
    }

    pub fn is_production_possible(&self) -> bool {
        !self.pending_eos && !matches!(self.state, BufState::Eos | BufState::Overflow)
    }

    pub fn is_consumption_possible(&self) -> bool {
        matches!(self.state, BufState::NonEmpty | BufState::Overflow)
    }

    /// Bytes still free in the current region.
    pub fn space_left(&self) -> usize {
        self.capacity_bytes - self.used_bytes
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Tuples not yet consumed.
    pub fn available_tuples(&self) -> usize {
        self.region.len() - self.read_pos
    }

    // ----- consumer side -----

    /// Consumer hands over an empty region of `capacity_bytes`.
    pub fn provide_buffer_for_production(&mut self, capacity_bytes: usize) {
        assert_eq!(self.provision, BufProvision::Consumer, "buffer is not consumer-provisioned");
        assert!(
            matches!(self.state, BufState::Underflow | BufState::Empty),
            "provide_buffer_for_production in {}",
            self.state
        );
        self.drop_region();
        self.capacity_bytes = capacity_bytes;
        self.set_state(BufState::Underflow);
    }

    /// Consumer asks for more input.
    pub fn request_production(&mut self) {
        assert!(
            matches!(self.state, BufState::Underflow | BufState::Empty),
            "request_production in {}",
            self.state
        );
        self.set_state(BufState::Underflow);
    }

    /// `true` if data can be read now; otherwise asks for production (unless
    /// at EOS) and returns `false`.
    pub fn demand_data(&mut self) -> bool {
        if self.state == BufState::Eos {
            return false;
        }
        if self.is_consumption_possible() {
            return true;
        }
        self.request_production();
        false
    }

    pub fn peek_tuple(&self) -> Option<&Tuple> {
        if self.is_consumption_possible() {
            self.region.get(self.read_pos)
        } else {
            None
        }
    }

    /// Advance past the current tuple; drains the buffer after the last one.
    pub fn consume_tuple(&mut self) -> Option<Tuple> {
        if !self.is_consumption_possible() || self.read_pos >= self.region.len() {
            return None;
        }
        let tuple = std::mem::take(&mut self.region[self.read_pos]);
        self.read_pos += 1;
        if self.read_pos == self.region.len() {
            self.finish_consumption();
        }
        Some(tuple)
    }

    /// Take every unread tuple at once.
    pub fn consume_all(&mut self) -> Vec<Tuple> {
        assert!(self.is_consumption_possible(), "consume_all in {}", self.state);
        let rest = self.region.split_off(self.read_pos);
        self.finish_consumption();
        rest
    }

    fn finish_consumption(&mut self) {
        self.drop_region();
        if self.pending_eos {
            self.pending_eos = false;
            self.set_state(BufState::Eos);
        } else {
            self.set_state(BufState::Empty);
        }
    }

    // ----- producer side -----

    /// Producer hands over a filled region it owns.
    pub fn provide_buffer_for_consumption(&mut self, tuples: Vec<Tuple>) {
        assert_eq!(self.provision, BufProvision::Producer, "buffer is not producer-provisioned");
        assert!(
            matches!(self.state, BufState::Underflow | BufState::Empty),
            "provide_buffer_for_consumption in {}",
            self.state
        );
        if tuples.is_empty() {
            return;
        }
        self.used_bytes = tuples.iter().map(Tuple::encoded_len).sum();
        self.capacity_bytes = self.used_bytes;
        self.region = tuples;
        self.read_pos = 0;
        self.set_state(BufState::NonEmpty);
    }

    /// Append one tuple to a consumer-provided region.
    ///
    /// Returns `Ok(false)` when it does not fit; the buffer is then in
    /// `Overflow` and the consumer has to run next.
    pub fn produce_tuple(&mut self, tuple: Tuple) -> Result<bool, BufferError> {
        assert!(self.is_production_possible(), "produce_tuple in {}", self.state);
        assert!(self.capacity_bytes > 0, "produce_tuple without a region");
        let bytes = tuple.encoded_len();
        if bytes <= self.space_left() {
            self.region.push(tuple);
            self.used_bytes += bytes;
            self.set_state(BufState::NonEmpty);
            return Ok(true);
        }
        if self.used_bytes == 0 {
            return Err(BufferError::TupleOverflow {
                tuple_bytes: bytes,
                capacity: self.capacity_bytes,
            });
        }
        self.request_consumption();
        Ok(false)
    }

    /// Producer says "drain me before I continue".
    pub fn request_consumption(&mut self) {
        assert!(
            matches!(self.state, BufState::NonEmpty | BufState::Overflow),
            "request_consumption in {}",
            self.state
        );
        self.set_state(BufState::Overflow);
    }

    /// Terminal once everything buffered has been consumed.
    pub fn mark_eos(&mut self) {
        if self.is_consumption_possible() {
            self.pending_eos = true;
        } else {
            self.drop_region();
            self.set_state(BufState::Eos);
        }
    }
}
