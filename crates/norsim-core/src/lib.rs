//! norsim-core - NOR flash, QSPI and Wishbone models
//!
//! Pin-level behavioural models that run on [`norsim_kernel`]:
//!
//! - [`nor`]: a parallel x16 NOR flash with the JEDEC/AMD command set, CFI,
//!   page-mode reads and ready/busy timing, plus the controller-side bus
//!   driver and a Wishbone to NOR bridge
//! - [`qspi`]: a quad SPI host and a QSPI to Wishbone target
//! - [`wishbone`]: a pipelined Wishbone initiator and responder stubs
//! - [`bench`]: the whole stack wired together
//!
//! Signals live on named [`bus::SignalBus`]es grouped into pin sets.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bench;
pub mod bus;
pub mod config;
pub mod error;
pub mod nor;
pub mod qspi;
pub mod wishbone;

pub use bench::{Bench, Testbench};
pub use bus::{NorPins, QspiPins, SignalBus, WishbonePins};
pub use config::SimConfig;
pub use error::{Error, Result};
