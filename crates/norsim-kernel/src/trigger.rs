//! Wait points

use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::event::EventCore;
use crate::kernel::{Sim, TriggerState, Waiter};
use crate::signal::{Edge, SignalCore};
use crate::time::SimTime;

enum TriggerKind {
    Timer(SimTime),
    Edge(Rc<SignalCore>, Edge),
    Settle,
    Event(Rc<EventCore>),
}

/// A future that completes when the simulation reaches a wait point
///
/// Triggers register lazily on first poll. Dropping an unfired trigger
/// cancels it, which is what makes `select` between triggers cheap.
pub struct Trigger {
    sim: Sim,
    kind: TriggerKind,
    state: Option<Rc<TriggerState>>,
}

impl Trigger {
    pub(crate) fn timer(sim: Sim, delay: SimTime) -> Self {
        Self::with_kind(sim, TriggerKind::Timer(delay))
    }

    pub(crate) fn edge(sim: Sim, core: Rc<SignalCore>, edge: Edge) -> Self {
        Self::with_kind(sim, TriggerKind::Edge(core, edge))
    }

    pub(crate) fn settle(sim: Sim) -> Self {
        Self::with_kind(sim, TriggerKind::Settle)
    }

    pub(crate) fn event(sim: Sim, core: Rc<EventCore>) -> Self {
        Self::with_kind(sim, TriggerKind::Event(core))
    }

    fn with_kind(sim: Sim, kind: TriggerKind) -> Self {
        Self {
            sim,
            kind,
            state: None,
        }
    }
}

impl Future for Trigger {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if let Some(state) = &this.state {
            return if state.is_fired() {
                Poll::Ready(())
            } else {
                Poll::Pending
            };
        }

        if let TriggerKind::Event(core) = &this.kind {
            if core.is_set() {
                return Poll::Ready(());
            }
        }

        let Some(task) = this.sim.current_task() else {
            log::warn!("trigger polled outside of a simulation task; it will never fire");
            return Poll::Pending;
        };

        let state = Rc::new(TriggerState::default());
        let waiter = Waiter::new(task, &state);
        match &this.kind {
            TriggerKind::Timer(delay) => {
                let delay = *delay;
                this.sim.with_kernel(|k| k.add_timer(delay, waiter));
            }
            TriggerKind::Settle => {
                this.sim.with_kernel(|k| k.add_settle(waiter));
            }
            TriggerKind::Edge(core, edge) => core.add_waiter(*edge, waiter),
            TriggerKind::Event(core) => core.add_waiter(waiter),
        }
        this.state = Some(state);
        Poll::Pending
    }
}
