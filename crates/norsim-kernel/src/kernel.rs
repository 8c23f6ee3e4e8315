//! Scheduler core
//!
//! The kernel runs in three nested loops:
//!
//! 1. Poll every ready task (a delta cycle).
//! 2. Apply the writes collected during that delta, waking edge waiters into
//!    the next delta. When nothing is left, wake the settle waiters.
//! 3. When the current time step is quiescent, advance to the earliest armed
//!    timer.
//!
//! Everything is single threaded and ordered by insertion, so two runs of
//! the same program produce identical traces.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::Context;

use crate::error::KernelError;
use crate::event::Event;
use crate::signal::{Signal, SignalCore};
use crate::task::JoinHandle;
use crate::time::{ms, Pretty, SimTime};
use crate::trigger::Trigger;

pub(crate) type TaskId = u64;

type BoxedTask = Pin<Box<dyn Future<Output = ()>>>;

/// Default bound on simulated time
pub const DEFAULT_TIME_LIMIT: SimTime = ms(100);

/// Shared between a pending trigger and the structure that will fire it.
///
/// Registrations only keep a weak reference, so a trigger that was dropped
/// (for example the losing side of a `select`) silently becomes inert.
#[derive(Debug, Default)]
pub(crate) struct TriggerState {
    fired: Cell<bool>,
}

impl TriggerState {
    pub(crate) fn is_fired(&self) -> bool {
        self.fired.get()
    }
}

/// A task parked on a trigger
#[derive(Debug, Clone)]
pub(crate) struct Waiter {
    task: TaskId,
    state: Weak<TriggerState>,
}

impl Waiter {
    pub(crate) fn new(task: TaskId, state: &Rc<TriggerState>) -> Self {
        Self {
            task,
            state: Rc::downgrade(state),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state.strong_count() > 0
    }

    /// Mark the trigger fired; returns the task to wake if anyone still cares
    pub(crate) fn fire(self) -> Option<TaskId> {
        let state = self.state.upgrade()?;
        state.fired.set(true);
        Some(self.task)
    }
}

struct TimerEntry {
    at: SimTime,
    seq: u64,
    waiter: Waiter,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed: BinaryHeap is a max-heap and we want the earliest timer first
    fn cmp(&self, other: &Self) -> Ordering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

pub(crate) struct Kernel {
    now: SimTime,
    seq: u64,
    next_task: TaskId,
    tasks: HashMap<TaskId, Option<BoxedTask>>,
    ready: VecDeque<TaskId>,
    queued: HashSet<TaskId>,
    current: Option<TaskId>,
    /// Killed while being polled; dropped once the poll returns
    doomed: HashSet<TaskId>,
    timers: BinaryHeap<TimerEntry>,
    settle: Vec<Waiter>,
    pending: Vec<(Rc<SignalCore>, u64)>,
    time_limit: SimTime,
}

impl Kernel {
    fn new() -> Self {
        Self {
            now: 0,
            seq: 0,
            next_task: 1,
            tasks: HashMap::new(),
            ready: VecDeque::new(),
            queued: HashSet::new(),
            current: None,
            doomed: HashSet::new(),
            timers: BinaryHeap::new(),
            settle: Vec::new(),
            pending: Vec::new(),
            time_limit: DEFAULT_TIME_LIMIT,
        }
    }

    pub(crate) fn now(&self) -> SimTime {
        self.now
    }

    pub(crate) fn current(&self) -> Option<TaskId> {
        self.current
    }

    pub(crate) fn wake(&mut self, task: TaskId) {
        if self.tasks.contains_key(&task) && self.queued.insert(task) {
            self.ready.push_back(task);
        }
    }

    pub(crate) fn add_timer(&mut self, delay: SimTime, waiter: Waiter) {
        self.seq += 1;
        self.timers.push(TimerEntry {
            at: self.now.saturating_add(delay),
            seq: self.seq,
            waiter,
        });
    }

    pub(crate) fn add_settle(&mut self, waiter: Waiter) {
        self.settle.push(waiter);
    }

    /// Queue a write; within one delta the last write to a signal wins
    pub(crate) fn schedule_write(&mut self, core: Rc<SignalCore>, value: u64) {
        match self.pending.iter_mut().find(|(c, _)| Rc::ptr_eq(c, &core)) {
            Some(slot) => slot.1 = value,
            None => self.pending.push((core, value)),
        }
    }

    fn insert_task(&mut self, task: BoxedTask) -> TaskId {
        let id = self.next_task;
        self.next_task += 1;
        self.tasks.insert(id, Some(task));
        self.wake(id);
        id
    }
}

pub(crate) struct SimInner {
    kernel: RefCell<Kernel>,
}

/// Owner of a simulation
///
/// Dropping the `Simulator` tears down every task; the [`Sim`] handles held
/// by models become inert.
pub struct Simulator {
    inner: Rc<SimInner>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// Create an empty simulation at time zero
    pub fn new() -> Self {
        Self {
            inner: Rc::new(SimInner {
                kernel: RefCell::new(Kernel::new()),
            }),
        }
    }

    /// A cloneable handle for models and tasks
    pub fn handle(&self) -> Sim {
        Sim {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Set the bound on simulated time
    pub fn set_time_limit(&self, limit: SimTime) {
        self.inner.kernel.borrow_mut().time_limit = limit;
    }

    /// Current bound on simulated time
    pub fn time_limit(&self) -> SimTime {
        self.inner.kernel.borrow().time_limit
    }

    /// Current simulated time
    pub fn now(&self) -> SimTime {
        self.inner.kernel.borrow().now
    }

    /// Drive the simulation until `main` completes
    ///
    /// Background tasks spawned before or during the run keep their state
    /// after this returns, so several scenarios can run back to back on one
    /// simulator.
    pub fn run<F>(&self, main: F) -> Result<F::Output, KernelError>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let handle = self.handle().spawn(main);
        loop {
            if self.settle_time_step(&handle) {
                break;
            }
            if !self.advance()? {
                let now = self.now();
                log::debug!("kernel starved at {}", Pretty(now));
                return Err(KernelError::Starved { now });
            }
        }
        handle
            .take_output()
            .ok_or(KernelError::Starved { now: self.now() })
    }

    /// Run deltas at the current time until nothing is left to do.
    /// Returns true as soon as `main` has finished.
    fn settle_time_step<T>(&self, main: &JoinHandle<T>) -> bool {
        loop {
            self.run_ready();
            if main.is_finished() {
                return true;
            }
            if self.apply_writes() {
                continue;
            }
            if self.wake_settled() {
                continue;
            }
            return false;
        }
    }

    fn run_ready(&self) {
        loop {
            let next = self.inner.kernel.borrow_mut().ready.pop_front();
            match next {
                Some(id) => self.poll_task(id),
                None => break,
            }
        }
    }

    fn poll_task(&self, id: TaskId) {
        let fut = {
            let mut k = self.inner.kernel.borrow_mut();
            k.queued.remove(&id);
            let fut = k.tasks.get_mut(&id).and_then(Option::take);
            if fut.is_some() {
                k.current = Some(id);
            }
            fut
        };
        let Some(mut fut) = fut else { return };

        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        let done = fut.as_mut().poll(&mut cx).is_ready();

        let finished = {
            let mut k = self.inner.kernel.borrow_mut();
            k.current = None;
            if done || k.doomed.remove(&id) {
                k.tasks.remove(&id);
                Some(fut)
            } else if let Some(slot) = k.tasks.get_mut(&id) {
                *slot = Some(fut);
                None
            } else {
                Some(fut)
            }
        };
        // Dropping a future may run destructors that touch the kernel
        drop(finished);
    }

    fn apply_writes(&self) -> bool {
        let pending = std::mem::take(&mut self.inner.kernel.borrow_mut().pending);
        if pending.is_empty() {
            return false;
        }
        let mut woken = Vec::new();
        for (core, value) in pending {
            core.apply(value, &mut woken);
        }
        let mut k = self.inner.kernel.borrow_mut();
        for waiter in woken {
            if let Some(task) = waiter.fire() {
                k.wake(task);
            }
        }
        true
    }

    fn wake_settled(&self) -> bool {
        let mut k = self.inner.kernel.borrow_mut();
        let waiters = std::mem::take(&mut k.settle);
        let mut any = false;
        for waiter in waiters {
            if let Some(task) = waiter.fire() {
                k.wake(task);
                any = true;
            }
        }
        any
    }

    fn advance(&self) -> Result<bool, KernelError> {
        let mut k = self.inner.kernel.borrow_mut();
        while k.timers.peek().is_some_and(|t| !t.waiter.is_alive()) {
            k.timers.pop();
        }
        let Some(at) = k.timers.peek().map(|t| t.at) else {
            return Ok(false);
        };
        if at > k.time_limit {
            return Err(KernelError::TimeLimit {
                limit: k.time_limit,
            });
        }
        k.now = at;
        while k.timers.peek().is_some_and(|t| t.at == at) {
            if let Some(entry) = k.timers.pop() {
                if let Some(task) = entry.waiter.fire() {
                    k.wake(task);
                }
            }
        }
        Ok(true)
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        // Drop task futures while the kernel is still reachable
        let tasks = std::mem::take(&mut self.inner.kernel.borrow_mut().tasks);
        drop(tasks);
    }
}

/// Weak, cloneable handle to a running simulation
///
/// Models keep a `Sim` to create signals, spawn tasks and build triggers.
/// Once the owning [`Simulator`] is dropped every operation becomes a no-op
/// and triggers never fire.
#[derive(Clone)]
pub struct Sim {
    inner: Weak<SimInner>,
}

impl core::fmt::Debug for Sim {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Sim").field("now", &self.now()).finish()
    }
}

impl Sim {
    pub(crate) fn with_kernel<R>(&self, f: impl FnOnce(&mut Kernel) -> R) -> Option<R> {
        let inner = self.inner.upgrade()?;
        let mut kernel = inner.kernel.borrow_mut();
        Some(f(&mut kernel))
    }

    /// Current simulated time
    pub fn now(&self) -> SimTime {
        self.with_kernel(|k| k.now()).unwrap_or(0)
    }

    /// Create a signal of `width` bits (1..=64) with an initial value
    pub fn signal(&self, name: impl Into<String>, width: u32, init: u64) -> Signal {
        Signal::new(self.clone(), name.into(), width, init)
    }

    /// Create an event, initially clear
    pub fn event(&self) -> Event {
        Event::new(self)
    }

    /// Start a concurrent task; it first runs in the current delta
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let done = self.event();
        let output = Rc::new(RefCell::new(None));
        let task = {
            let done = done.clone();
            let output = Rc::clone(&output);
            async move {
                let value = fut.await;
                *output.borrow_mut() = Some(value);
                done.set();
            }
        };
        let id = self
            .with_kernel(|k| k.insert_task(Box::pin(task)))
            .unwrap_or(0);
        JoinHandle::new(id, self.clone(), done, output)
    }

    /// Fires `delay` after the current time; a zero delay fires once the
    /// current time step is quiescent
    pub fn timer(&self, delay: SimTime) -> Trigger {
        Trigger::timer(self.clone(), delay)
    }

    /// Fires once the current time step has no pending writes or runnable
    /// tasks left, i.e. when every signal has its final value for this time
    pub fn settle(&self) -> Trigger {
        Trigger::settle(self.clone())
    }

    pub(crate) fn current_task(&self) -> Option<TaskId> {
        self.with_kernel(|k| k.current()).flatten()
    }

    pub(crate) fn kill_task(&self, id: TaskId) {
        let removed = self.with_kernel(|k| {
            if k.current == Some(id) {
                k.doomed.insert(id);
                return None;
            }
            match k.tasks.get(&id) {
                Some(Some(_)) => k.tasks.remove(&id).flatten(),
                Some(None) => {
                    k.doomed.insert(id);
                    None
                }
                None => None,
            }
        });
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ns;
    use std::cell::RefCell;

    #[test]
    fn test_timer_advances_time() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let t = simulator
            .run(async move {
                sim.timer(ns(10)).await;
                sim.timer(ns(5)).await;
                sim.now()
            })
            .unwrap();
        assert_eq!(t, ns(15));
    }

    #[test]
    fn test_writes_are_deferred_to_end_of_delta() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let seen = simulator
            .run(async move {
                let s = sim.signal("s", 8, 1);
                s.set(7);
                let before = s.value();
                sim.settle().await;
                (before, s.value())
            })
            .unwrap();
        assert_eq!(seen, (1, 7));
    }

    #[test]
    fn test_last_write_in_delta_wins() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let v = simulator
            .run(async move {
                let s = sim.signal("s", 8, 0);
                s.set(3);
                s.set(9);
                sim.settle().await;
                s.value()
            })
            .unwrap();
        assert_eq!(v, 9);
    }

    #[test]
    fn test_edge_waiters_see_pre_edge_values() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let log = Rc::new(RefCell::new(Vec::new()));
        let out = simulator
            .run({
                let log = Rc::clone(&log);
                async move {
                    let clk = sim.signal("clk", 1, 0);
                    let d = sim.signal("d", 8, 0);
                    let q = sim.signal("q", 8, 0);
                    // Register: q <= d on every rising edge
                    let reg = {
                        let (clk, d, q) = (clk.clone(), d.clone(), q.clone());
                        sim.spawn(async move {
                            loop {
                                clk.rising_edge().await;
                                q.set(d.value());
                            }
                        })
                    };
                    // Producer updates d on the same edge
                    let producer = {
                        let (clk, d, log) = (clk.clone(), d.clone(), Rc::clone(&log));
                        sim.spawn(async move {
                            for i in 1..=3u64 {
                                clk.rising_edge().await;
                                log.borrow_mut().push(d.value());
                                d.set(i * 10);
                            }
                        })
                    };
                    for _ in 0..4 {
                        sim.timer(ns(5)).await;
                        clk.set(1);
                        sim.timer(ns(5)).await;
                        clk.set(0);
                    }
                    producer.join().await;
                    reg.kill();
                    q.value()
                }
            })
            .unwrap();
        assert_eq!(*log.borrow(), vec![0, 10, 20]);
        assert_eq!(out, 30);
    }

    #[test]
    fn test_starvation_is_reported() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let err = simulator
            .run(async move {
                let s = sim.signal("never", 1, 0);
                s.rising_edge().await;
            })
            .unwrap_err();
        assert_eq!(err, KernelError::Starved { now: 0 });
    }

    #[test]
    fn test_time_limit_is_enforced() {
        let simulator = Simulator::new();
        simulator.set_time_limit(ns(100));
        let sim = simulator.handle();
        let err = simulator
            .run(async move {
                loop {
                    sim.timer(ns(30)).await;
                }
            })
            .unwrap_err();
        assert_eq!(err, KernelError::TimeLimit { limit: ns(100) });
    }

    #[test]
    fn test_killed_task_stops_running() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let count = Rc::new(Cell::new(0u32));
        let seen = simulator
            .run({
                let count = Rc::clone(&count);
                async move {
                    let ticker = {
                        let (sim2, count) = (sim.clone(), Rc::clone(&count));
                        sim.spawn(async move {
                            loop {
                                sim2.timer(ns(1)).await;
                                count.set(count.get() + 1);
                            }
                        })
                    };
                    sim.timer(ns(5)).await;
                    ticker.kill();
                    let at_kill = count.get();
                    sim.timer(ns(5)).await;
                    assert!(ticker.join().await.is_none());
                    (at_kill, count.get())
                }
            })
            .unwrap();
        assert_eq!(seen.0, seen.1);
    }

    #[test]
    fn test_scheduling_is_deterministic() {
        fn trace() -> Vec<(u64, u32)> {
            let simulator = Simulator::new();
            let sim = simulator.handle();
            let log = Rc::new(RefCell::new(Vec::new()));
            simulator
                .run({
                    let log = Rc::clone(&log);
                    async move {
                        let mut handles = Vec::new();
                        for id in 0..4u32 {
                            let (sim2, log) = (sim.clone(), Rc::clone(&log));
                            handles.push(sim.spawn(async move {
                                for step in 0..3u64 {
                                    sim2.timer(ns(step + u64::from(id % 2))).await;
                                    log.borrow_mut().push((sim2.now(), id));
                                }
                            }));
                        }
                        for h in &handles {
                            h.join().await;
                        }
                    }
                })
                .unwrap();
            let out = log.borrow().clone();
            out
        }
        assert_eq!(trace(), trace());
    }
}
