//! One-shot notification between tasks

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::kernel::{Sim, Waiter};
use crate::trigger::Trigger;

#[derive(Default)]
pub(crate) struct EventCore {
    set: Cell<bool>,
    waiters: RefCell<Vec<Waiter>>,
}

impl EventCore {
    pub(crate) fn is_set(&self) -> bool {
        self.set.get()
    }

    pub(crate) fn add_waiter(&self, waiter: Waiter) {
        self.waiters.borrow_mut().push(waiter);
    }
}

/// A level-sensitive flag tasks can wait on
///
/// Waiters are released in the same delta the event is set. Waiting on an
/// event that is already set returns immediately.
#[derive(Clone)]
pub struct Event {
    core: Rc<EventCore>,
    sim: Sim,
}

impl Event {
    pub(crate) fn new(sim: &Sim) -> Self {
        Self {
            core: Rc::new(EventCore::default()),
            sim: sim.clone(),
        }
    }

    /// Set the flag and release every waiter
    pub fn set(&self) {
        self.core.set.set(true);
        let waiters = std::mem::take(&mut *self.core.waiters.borrow_mut());
        self.sim.with_kernel(|k| {
            for waiter in waiters {
                if let Some(task) = waiter.fire() {
                    k.wake(task);
                }
            }
        });
    }

    /// Clear the flag; later waits block again
    pub fn clear(&self) {
        self.core.set.set(false);
    }

    /// Whether the flag is set
    pub fn is_set(&self) -> bool {
        self.core.is_set()
    }

    /// Completes once the flag is set
    pub fn wait(&self) -> Trigger {
        Trigger::event(self.sim.clone(), Rc::clone(&self.core))
    }
}

#[cfg(test)]
mod tests {
    use crate::time::ns;
    use crate::Simulator;

    #[test]
    fn test_event_releases_waiter() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let t = simulator
            .run(async move {
                let ev = sim.event();
                {
                    let (sim2, ev) = (sim.clone(), ev.clone());
                    sim.spawn(async move {
                        sim2.timer(ns(25)).await;
                        ev.set();
                    });
                }
                ev.wait().await;
                sim.now()
            })
            .unwrap();
        assert_eq!(t, ns(25));
    }

    #[test]
    fn test_set_event_does_not_block() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let t = simulator
            .run(async move {
                let ev = sim.event();
                ev.set();
                ev.wait().await;
                ev.clear();
                assert!(!ev.is_set());
                sim.now()
            })
            .unwrap();
        assert_eq!(t, 0);
    }
}
