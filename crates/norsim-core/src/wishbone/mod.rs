//! Pipelined Wishbone
//!
//! A request is accepted at the rising clock edge where `cyc` and `stb` are
//! high and `stall` is low. The initiator holds `stb` and the address until
//! then. `ack` is the only completion signal and is high for exactly one
//! edge per request; responses come back in request order.

use std::cell::RefCell;
use std::rc::Rc;

mod initiator;
mod responder;

pub use initiator::WishboneMaster;
pub use responder::{ReplyFn, Script, StubOptions, WishboneResponder};

/// One completed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTransaction {
    /// Request address
    pub address: u64,
    /// Write request
    pub write: bool,
    /// Write data (0 for reads)
    pub wdata: u64,
    /// Read data, for reads
    pub rdata: Option<u64>,
    /// Clock edges from acceptance to the edge that sampled `ack`
    pub ack_latency: u32,
}

/// Shared record of the requests a monitor stub has seen
#[derive(Debug, Clone, Default)]
pub struct MonitorLog(Rc<RefCell<Vec<BusTransaction>>>);

impl MonitorLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, txn: BusTransaction) {
        self.0.borrow_mut().push(txn);
    }

    /// Copy of every recorded request
    pub fn entries(&self) -> Vec<BusTransaction> {
        self.0.borrow().clone()
    }

    /// Number of recorded requests
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Nothing recorded yet
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Forget every recorded request
    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}
