//! QSPI frame layout
//!
//! A frame is `opcode | address | stall | payload or read data`. The opcode
//! goes out MSB first on one or four lanes; the address is always eight quad
//! cycles, most significant nibble first; every 16-bit word takes four quad
//! cycles, most significant nibble first.

use norsim_kernel::time::NS;
use norsim_kernel::SimTime;

use super::opcodes::{FrameFlags, Lanes, QspiCommand};
use crate::error::{Error, Result};

/// Quad cycles per address
pub const ADDRESS_NIBBLES: u32 = 8;
/// Quad cycles per data word
pub const WORD_NIBBLES: u32 = 4;

/// Serial clock period for a frequency in MHz, rounded to the nearest 10 ps
pub fn period_ps(freq_mhz: f64) -> Result<SimTime> {
    if !(freq_mhz.is_finite() && freq_mhz > 0.0) {
        return Err(Error::Config(format!("invalid QSPI frequency {} MHz", freq_mhz)));
    }
    let tens = (1.0e6 / freq_mhz / 10.0).round() as SimTime;
    if tens == 0 {
        return Err(Error::Config(format!("QSPI frequency {} MHz too high", freq_mhz)));
    }
    Ok(tens * 10)
}

/// Bits of `byte`, MSB first
pub fn bits_msb(byte: u8) -> impl Iterator<Item = u64> {
    (0..8).rev().map(move |i| u64::from((byte >> i) & 1))
}

/// The low `count` nibbles of `value`, most significant first
pub fn nibbles_msb(value: u64, count: u32) -> impl Iterator<Item = u64> {
    (0..count).rev().map(move |i| (value >> (4 * i)) & 0xF)
}

/// Fold nibbles, most significant first, back into a value
pub fn assemble_nibbles(nibbles: impl IntoIterator<Item = u64>) -> u64 {
    nibbles.into_iter().fold(0, |acc, n| (acc << 4) | (n & 0xF))
}

/// One serialized exchange
#[derive(Debug, Clone, PartialEq)]
pub struct QspiFrame {
    /// The command
    pub command: QspiCommand,
    /// Address, for commands with an address phase
    pub address: Option<u32>,
    /// Words sent after the stall
    pub payload: Vec<u16>,
    /// Words read after the stall
    pub read_words: usize,
    /// Serial clock period
    pub period: SimTime,
    /// Chip select is active high
    pub sce_active_high: bool,
    /// Lanes for the opcode phase
    pub opcode_lanes: Lanes,
    /// Extra delay before the first clock edge
    pub toff: SimTime,
}

impl QspiFrame {
    /// A frame for `command` at 1 MHz, active-low chip select, no data
    pub fn new(command: QspiCommand) -> Self {
        Self {
            command,
            address: None,
            payload: Vec::new(),
            read_words: 0,
            period: 1000 * NS,
            sce_active_high: false,
            opcode_lanes: Lanes::Single,
            toff: 0,
        }
    }

    /// Set the address
    pub fn with_address(mut self, address: u32) -> Self {
        self.address = Some(address);
        self
    }

    /// Set the payload
    pub fn with_payload(mut self, payload: &[u16]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Set the number of words to read
    pub fn with_read_words(mut self, count: usize) -> Self {
        self.read_words = count;
        self
    }

    /// Set the clocking
    pub fn with_clock(mut self, period: SimTime, sce_active_high: bool, lanes: Lanes) -> Self {
        self.period = period;
        self.sce_active_high = sce_active_high;
        self.opcode_lanes = lanes;
        self
    }

    /// Set the start offset
    pub fn with_toff(mut self, toff: SimTime) -> Self {
        self.toff = toff;
        self
    }

    /// Stall cycles between address and data
    pub fn stall(&self) -> u32 {
        self.command.stall()
    }

    /// Check that the frame carries exactly the phases its command has
    pub fn validate(&self) -> Result<()> {
        let flags = self.command.flags();
        let bad = |what: &str| Err(Error::violation("qspi", format!("{}: {}", self.command, what)));

        if flags.contains(FrameFlags::ADDRESS) != self.address.is_some() {
            return bad("address phase mismatch");
        }
        if flags.contains(FrameFlags::PAYLOAD) && self.payload.len() != 1 {
            return bad("takes exactly one payload word");
        }
        if flags.contains(FrameFlags::STREAM) && self.payload.is_empty() {
            return bad("takes at least one payload word");
        }
        if !flags.intersects(FrameFlags::WRITE) && !self.payload.is_empty() {
            return bad("takes no payload");
        }
        if flags.contains(FrameFlags::READ) != (self.read_words > 0) {
            return bad("read length mismatch");
        }
        if self.period < 2 {
            return bad("clock period too short");
        }
        Ok(())
    }

    /// `sio` values of the opcode phase
    pub fn opcode_cycles(&self) -> Vec<u64> {
        let opcode = self.command.opcode();
        match self.opcode_lanes {
            Lanes::Single => bits_msb(opcode).collect(),
            Lanes::Quad => nibbles_msb(u64::from(opcode), 2).collect(),
        }
    }

    /// `sio` values of the address phase
    pub fn address_cycles(&self) -> Vec<u64> {
        self.address
            .map(|a| nibbles_msb(u64::from(a), ADDRESS_NIBBLES).collect())
            .unwrap_or_default()
    }

    /// `sio` values of the payload phase
    pub fn payload_cycles(&self) -> Vec<u64> {
        self.payload
            .iter()
            .flat_map(|&w| nibbles_msb(u64::from(w), WORD_NIBBLES))
            .collect()
    }

    /// Serial clock cycles of the whole frame
    pub fn cycles(&self) -> u64 {
        let data = self.payload.len() + self.read_words;
        (self.opcode_lanes.opcode_cycles()
            + if self.address.is_some() { ADDRESS_NIBBLES } else { 0 }
            + self.stall()) as u64
            + (data as u64) * u64::from(WORD_NIBBLES)
    }

    /// Lower bound on the frame duration
    pub fn duration(&self) -> SimTime {
        self.cycles() * self.period + self.period + self.toff
    }
}
