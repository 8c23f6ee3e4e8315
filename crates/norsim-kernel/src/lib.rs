//! norsim-kernel - Deterministic discrete-event kernel
//!
//! This crate provides the substrate the bus and device models run on: a
//! single logical timeline, named signals with delta-cycle update
//! semantics, and cooperative tasks that only make progress at explicit
//! wait points (a signal edge, an elapsed delay, an event, or the settle
//! point of the current time step).
//!
//! # Update semantics
//!
//! Writes to a [`Signal`] are deferred to the end of the current delta
//! cycle. Every task woken by the same edge therefore observes the values
//! from *before* that edge, which is how registered logic behaves. A task
//! that needs the fully resolved value of a signal at the current time
//! awaits [`Sim::settle`] first.
//!
//! # Example
//!
//! ```ignore
//! use norsim_kernel::{time::ns, Clock, Simulator};
//!
//! let simulator = Simulator::new();
//! let sim = simulator.handle();
//! let clk = sim.signal("clk", 1, 0);
//! Clock::new(clk.clone(), ns(10)).start(&sim);
//!
//! let cycles = simulator.run(async move {
//!     norsim_kernel::clock_cycles(&clk, 4).await;
//!     sim.now()
//! })?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod clock;
mod error;
mod event;
mod kernel;
mod signal;
mod task;
pub mod time;
mod trigger;
mod wait;

pub use clock::Clock;
pub use error::{KernelError, Timeout};
pub use event::Event;
pub use kernel::{Sim, Simulator, DEFAULT_TIME_LIMIT};
pub use signal::{Edge, Signal};
pub use task::JoinHandle;
pub use time::{ms, ns, ns_f64, us, SimTime};
pub use trigger::Trigger;
pub use wait::{clock_cycles, falling_cycles, with_timeout};
