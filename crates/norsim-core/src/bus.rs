//! Signal bus and the pin groups of each interface
//!
//! A [`SignalBus`] is a named collection of signals that both sides of an
//! interface hold. The typed pin groups below are thin views over a bus so
//! models can address pins as fields instead of by string.

use std::collections::BTreeMap;

use norsim_kernel::{Sim, Signal};

use crate::error::{Error, Result};

/// Named collection of signals
#[derive(Debug, Clone)]
pub struct SignalBus {
    prefix: String,
    sim: Sim,
    signals: BTreeMap<String, Signal>,
}

impl SignalBus {
    /// Create an empty bus; signal names are reported as `prefix.name`
    pub fn new(sim: &Sim, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sim: sim.clone(),
            signals: BTreeMap::new(),
        }
    }

    /// Bus prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Add a signal (or return the existing one of that name)
    pub fn add(&mut self, name: &str, width: u32, init: u64) -> Signal {
        if let Some(existing) = self.signals.get(name) {
            return existing.clone();
        }
        let signal = self
            .sim
            .signal(format!("{}.{}", self.prefix, name), width, init);
        self.signals.insert(name.to_string(), signal.clone());
        signal
    }

    /// Look up a signal by its short name
    pub fn get(&self, name: &str) -> Result<Signal> {
        self.signals.get(name).cloned().ok_or_else(|| {
            Error::Config(format!("bus '{}' has no signal '{}'", self.prefix, name))
        })
    }

    /// Current committed value of every signal, for diagnostics
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.signals
            .iter()
            .map(|(name, s)| (name.clone(), s.value()))
            .collect()
    }
}

/// Parallel NOR flash pins
///
/// `ce`, `oe` and `we` are active low. `doe` is the controller's output
/// enable for the shared data bus: high while the controller drives
/// `data_o`, low while the flash may drive `data_i`.
#[derive(Debug, Clone)]
pub struct NorPins {
    /// Chip enable (active low)
    pub ce: Signal,
    /// Output enable (active low)
    pub oe: Signal,
    /// Write enable (active low)
    pub we: Signal,
    /// Controller data output enable
    pub doe: Signal,
    /// Word address
    pub addr: Signal,
    /// Data from controller to flash
    pub data_o: Signal,
    /// Data from flash to controller
    pub data_i: Signal,
    /// Ready (1) / busy (0)
    pub ry: Signal,
}

impl NorPins {
    /// Default address bus width in bits (64 Mword)
    pub const ADDR_WIDTH: u32 = 26;
    /// Data bus width in bits
    pub const DATA_WIDTH: u32 = 16;

    /// Create the pins on `bus` with idle levels
    pub fn new(bus: &mut SignalBus) -> Self {
        Self {
            ce: bus.add("ce", 1, 1),
            oe: bus.add("oe", 1, 1),
            we: bus.add("we", 1, 1),
            doe: bus.add("doe", 1, 0),
            addr: bus.add("addr", Self::ADDR_WIDTH, 0),
            data_o: bus.add("data_o", Self::DATA_WIDTH, 0),
            data_i: bus.add("data_i", Self::DATA_WIDTH, 0),
            ry: bus.add("ry", 1, 1),
        }
    }

    /// Create the pins on a fresh bus called `prefix`
    pub fn create(sim: &Sim, prefix: &str) -> Self {
        Self::new(&mut SignalBus::new(sim, prefix))
    }
}

/// Quad SPI pins
///
/// `sio_i` is driven by the host, `sio_o` by the target; `sio_oe` is high
/// while the target drives `sio_o`.
#[derive(Debug, Clone)]
pub struct QspiPins {
    /// Serial clock
    pub sck: Signal,
    /// Chip select (polarity configurable)
    pub sce: Signal,
    /// Host to target data, 4 lanes
    pub sio_i: Signal,
    /// Target to host data, 4 lanes
    pub sio_o: Signal,
    /// Target output enable
    pub sio_oe: Signal,
}

impl QspiPins {
    /// Create the pins on `bus`; `sce` idles at its inactive level
    pub fn new(bus: &mut SignalBus, sce_active_high: bool) -> Self {
        Self {
            sck: bus.add("sck", 1, 0),
            sce: bus.add("sce", 1, u64::from(!sce_active_high)),
            sio_i: bus.add("sio_i", 4, 0),
            sio_o: bus.add("sio_o", 4, 0),
            sio_oe: bus.add("sio_oe", 1, 0),
        }
    }

    /// Create the pins on a fresh bus called `prefix`
    pub fn create(sim: &Sim, prefix: &str, sce_active_high: bool) -> Self {
        Self::new(&mut SignalBus::new(sim, prefix), sce_active_high)
    }
}

/// Pipelined Wishbone pins
#[derive(Debug, Clone)]
pub struct WishbonePins {
    /// Bus clock
    pub clk: Signal,
    /// Synchronous reset
    pub rst: Signal,
    /// Cycle
    pub cyc: Signal,
    /// Strobe
    pub stb: Signal,
    /// Write enable
    pub we: Signal,
    /// Address
    pub adr: Signal,
    /// Initiator to responder data
    pub wdata: Signal,
    /// Responder to initiator data
    pub rdata: Signal,
    /// Acknowledge
    pub ack: Signal,
    /// Stall
    pub stall: Signal,
}

impl WishbonePins {
    /// Address width in bits
    pub const ADDR_WIDTH: u32 = 32;
    /// Data width in bits
    pub const DATA_WIDTH: u32 = 16;

    /// Create the pins on `bus`
    pub fn new(bus: &mut SignalBus) -> Self {
        Self {
            clk: bus.add("clk", 1, 0),
            rst: bus.add("rst", 1, 0),
            cyc: bus.add("cyc", 1, 0),
            stb: bus.add("stb", 1, 0),
            we: bus.add("we", 1, 0),
            adr: bus.add("adr", Self::ADDR_WIDTH, 0),
            wdata: bus.add("wdata", Self::DATA_WIDTH, 0),
            rdata: bus.add("rdata", Self::DATA_WIDTH, 0),
            ack: bus.add("ack", 1, 0),
            stall: bus.add("stall", 1, 0),
        }
    }

    /// Create the pins on a fresh bus called `prefix`
    pub fn create(sim: &Sim, prefix: &str) -> Self {
        Self::new(&mut SignalBus::new(sim, prefix))
    }
}
