//! Named signals

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::kernel::{Sim, Waiter};
use crate::trigger::Trigger;

/// Kind of transition a trigger waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Any change of value
    Any,
    /// Zero to non-zero
    Rising,
    /// Non-zero to zero
    Falling,
}

impl Edge {
    fn matches(self, old: u64, new: u64) -> bool {
        match self {
            Edge::Any => old != new,
            Edge::Rising => old == 0 && new != 0,
            Edge::Falling => old != 0 && new == 0,
        }
    }
}

pub(crate) struct SignalCore {
    name: String,
    width: u32,
    mask: u64,
    value: Cell<u64>,
    waiters: RefCell<Vec<(Edge, Waiter)>>,
}

impl SignalCore {
    /// Commit a value, collecting the waiters whose edge matched
    pub(crate) fn apply(&self, value: u64, woken: &mut Vec<Waiter>) {
        let old = self.value.get();
        if old == value {
            return;
        }
        self.value.set(value);
        log::trace!("{} {:#x} -> {:#x}", self.name, old, value);

        let mut waiters = self.waiters.borrow_mut();
        let mut keep = Vec::with_capacity(waiters.len());
        for (edge, waiter) in waiters.drain(..) {
            if !waiter.is_alive() {
                continue;
            }
            if edge.matches(old, value) {
                woken.push(waiter);
            } else {
                keep.push((edge, waiter));
            }
        }
        *waiters = keep;
    }

    pub(crate) fn add_waiter(&self, edge: Edge, waiter: Waiter) {
        self.waiters.borrow_mut().push((edge, waiter));
    }
}

/// A named, fixed-width value shared between models
///
/// Cloning a `Signal` yields another handle to the same wire.
#[derive(Clone)]
pub struct Signal {
    core: Rc<SignalCore>,
    sim: Sim,
}

impl Signal {
    pub(crate) fn new(sim: Sim, name: String, width: u32, init: u64) -> Self {
        let width = width.clamp(1, 64);
        let mask = if width == 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        };
        Self {
            core: Rc::new(SignalCore {
                name,
                width,
                mask,
                value: Cell::new(init & mask),
                waiters: RefCell::new(Vec::new()),
            }),
            sim,
        }
    }

    /// Signal name
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Width in bits
    pub fn width(&self) -> u32 {
        self.core.width
    }

    /// Committed value
    pub fn value(&self) -> u64 {
        self.core.value.get()
    }

    /// Committed value is non-zero
    pub fn is_high(&self) -> bool {
        self.value() != 0
    }

    /// Committed value is zero
    pub fn is_low(&self) -> bool {
        self.value() == 0
    }

    /// Schedule a write for the end of the current delta cycle.
    /// Values are truncated to the signal width.
    pub fn set(&self, value: u64) {
        let value = value & self.core.mask;
        let core = Rc::clone(&self.core);
        self.sim.with_kernel(|k| k.schedule_write(core, value));
    }

    /// Schedule a write of 1 or 0
    pub fn set_bool(&self, level: bool) {
        self.set(u64::from(level));
    }

    /// Fires on the next zero to non-zero transition
    pub fn rising_edge(&self) -> Trigger {
        Trigger::edge(self.sim.clone(), Rc::clone(&self.core), Edge::Rising)
    }

    /// Fires on the next non-zero to zero transition
    pub fn falling_edge(&self) -> Trigger {
        Trigger::edge(self.sim.clone(), Rc::clone(&self.core), Edge::Falling)
    }

    /// Fires on the next change of value
    pub fn edge(&self) -> Trigger {
        Trigger::edge(self.sim.clone(), Rc::clone(&self.core), Edge::Any)
    }

    /// Return once the committed value equals `value`
    pub async fn wait_for(&self, value: u64) {
        let value = value & self.core.mask;
        while self.value() != value {
            self.edge().await;
        }
    }

    /// Same wire
    pub fn same_as(&self, other: &Signal) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]={:#x}", self.core.name, self.core.width, self.value())
    }
}
