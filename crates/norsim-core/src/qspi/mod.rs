//! Quad SPI
//!
//! - [`opcodes`]: command bytes and per-command frame layout
//! - [`frame`]: frame description and nibble/bit ordering
//! - [`host`]: drives frames and samples read data
//! - [`target`]: decodes frames into Wishbone requests

pub mod frame;
pub mod host;
pub mod opcodes;
pub mod target;

pub use frame::{period_ps, QspiFrame};
pub use host::{QspiHost, QspiHostConfig};
pub use opcodes::{FrameFlags, Lanes, QspiCommand};
pub use target::{QspiTarget, QspiTargetConfig};
