//! Parallel x16 NOR flash
//!
//! - [`array`]: word storage with AND-only programming and block erase
//! - [`cfi`]: CFI identification table
//! - [`command`]: JEDEC/AMD unlock sequence decoder and command sequences
//! - [`device`]: the pin-level behavioural device model
//! - [`bus`]: controller-side NOR bus driver
//! - [`controller`]: Wishbone responder that forwards to the NOR bus

pub mod array;
pub mod bus;
pub mod cfi;
pub mod command;
pub mod controller;
pub mod device;
pub mod timing;

pub use array::{NorArray, Word};
pub use bus::{NorBusMaster, NorBusTiming};
pub use cfi::CfiTable;
pub use command::{CommandEffect, CommandInterpreter, CommandSequence, CommandState};
pub use controller::NorController;
pub use device::{BusState, DeviceState, NorFlash, NorParams, Overlay};
pub use timing::{MutationPolicy, NorGeometry, NorTiming, ReadWhileBusy};
