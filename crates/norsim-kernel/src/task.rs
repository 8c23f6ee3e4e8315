//! Handles to spawned tasks

use std::cell::RefCell;
use std::rc::Rc;

use crate::event::Event;
use crate::kernel::{Sim, TaskId};

/// Handle to a spawned task
///
/// Dropping the handle detaches the task; it keeps running.
pub struct JoinHandle<T> {
    id: TaskId,
    sim: Sim,
    done: Event,
    output: Rc<RefCell<Option<T>>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(id: TaskId, sim: Sim, done: Event, output: Rc<RefCell<Option<T>>>) -> Self {
        Self {
            id,
            sim,
            done,
            output,
        }
    }

    /// Wait for the task to finish and take its output.
    ///
    /// Returns `None` when the task was killed or the output was already
    /// taken.
    pub async fn join(&self) -> Option<T> {
        self.done.wait().await;
        self.output.borrow_mut().take()
    }

    /// Stop the task at its current wait point and drop its state.
    /// A task may kill itself; it stops at its next wait point.
    pub fn kill(&self) {
        if self.done.is_set() {
            return;
        }
        log::trace!("killing task {}", self.id);
        self.sim.kill_task(self.id);
        self.done.set();
    }

    /// The task completed or was killed
    pub fn is_finished(&self) -> bool {
        self.done.is_set()
    }

    /// Take the output of a finished task without waiting
    pub fn take_output(&self) -> Option<T> {
        self.output.borrow_mut().take()
    }
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
