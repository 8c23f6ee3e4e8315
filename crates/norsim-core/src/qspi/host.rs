//! QSPI host: drives frames onto [`QspiPins`]
//!
//! Frame sequence: assert chip select, wait one period plus `toff`, start
//! the serial clock, shift opcode, address and payload out on falling edges,
//! wait the stall cycles, sample read data on rising edges, then stop the
//! clock and release chip select.

use norsim_kernel::{falling_cycles, ns, ns_f64, Clock, Sim, SimTime};
use serde::Deserialize;

use super::frame::{assemble_nibbles, period_ps, QspiFrame, WORD_NIBBLES};
use super::opcodes::{Lanes, QspiCommand};
use crate::bus::QspiPins;
use crate::error::{Error, Result};

/// Chip select hold after the clock stopped at the end of a frame
const SCE_HOLD: SimTime = ns(9);
/// Idle time after chip select is released
const SCE_IDLE: SimTime = ns(1);

/// Host clocking parameters
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct QspiHostConfig {
    /// Serial clock frequency in MHz
    pub freq_mhz: f64,
    /// Chip select is active high
    pub sce_active_high: bool,
    /// Lanes for the opcode phase
    pub opcode_lanes: Lanes,
    /// Extra delay in ns before the first clock edge of every frame
    pub toff_ns: f64,
}

impl Default for QspiHostConfig {
    fn default() -> Self {
        Self {
            freq_mhz: 20.0,
            sce_active_high: true,
            opcode_lanes: Lanes::Single,
            toff_ns: 0.0,
        }
    }
}

/// Drives QSPI frames and collects read data
#[derive(Debug, Clone)]
pub struct QspiHost {
    sim: Sim,
    pins: QspiPins,
    config: QspiHostConfig,
    period: SimTime,
}

impl QspiHost {
    /// Create a host; chip select is driven inactive and the clock low
    pub fn new(sim: &Sim, pins: QspiPins, config: QspiHostConfig) -> Result<Self> {
        let period = period_ps(config.freq_mhz)?;
        pins.sck.set(0);
        pins.sce.set_bool(!config.sce_active_high);
        Ok(Self {
            sim: sim.clone(),
            pins,
            config,
            period,
        })
    }

    /// Pins driven by this host
    pub fn pins(&self) -> &QspiPins {
        &self.pins
    }

    /// Current configuration
    pub fn config(&self) -> &QspiHostConfig {
        &self.config
    }

    /// Serial clock period
    pub fn period(&self) -> SimTime {
        self.period
    }

    /// Change the serial clock frequency for following frames
    pub fn set_frequency(&mut self, freq_mhz: f64) -> Result<()> {
        self.period = period_ps(freq_mhz)?;
        self.config.freq_mhz = freq_mhz;
        Ok(())
    }

    /// Change the start offset for following frames
    pub fn set_toff(&mut self, toff_ns: f64) {
        self.config.toff_ns = toff_ns.max(0.0);
    }

    /// A frame for `command` with this host's clocking
    pub fn frame(&self, command: QspiCommand) -> QspiFrame {
        QspiFrame::new(command)
            .with_clock(self.period, self.config.sce_active_high, self.config.opcode_lanes)
            .with_toff(ns_f64(self.config.toff_ns))
    }

    /// Run one frame; returns the words read, if any
    pub async fn transfer(&self, frame: &QspiFrame) -> Result<Vec<u16>> {
        frame.validate()?;
        let p = &self.pins;
        let opcode = frame.opcode_cycles();
        log::debug!(
            "[qspi] {} addr={:?} payload={} read={} T={} ps",
            frame.command,
            frame.address.map(|a| format!("{:X}", a)),
            frame.payload.len(),
            frame.read_words,
            frame.period
        );

        p.sce.set_bool(frame.sce_active_high);
        p.sio_i.set(opcode[0]);
        self.sim.timer(frame.period + frame.toff).await;

        let clock = Clock::new(p.sck.clone(), frame.period).start(&self.sim);
        let result = self.shift(frame, &opcode).await;

        clock.kill();
        p.sck.set(0);
        self.sim.timer(SCE_HOLD).await;
        p.sce.set_bool(!frame.sce_active_high);
        self.sim.timer(SCE_IDLE).await;
        result
    }

    async fn shift(&self, frame: &QspiFrame, opcode: &[u64]) -> Result<Vec<u16>> {
        let p = &self.pins;
        self.shift_out(opcode).await;
        self.shift_out(&frame.address_cycles()).await;
        let stall = frame.stall();
        if stall > 0 {
            falling_cycles(&p.sck, stall).await;
        }

        self.shift_out(&frame.payload_cycles()).await;

        let mut words = Vec::with_capacity(frame.read_words);
        for i in 0..frame.read_words {
            let mut nibbles = [0u64; WORD_NIBBLES as usize];
            for (n, nibble) in nibbles.iter_mut().enumerate() {
                p.sck.rising_edge().await;
                if p.sio_oe.is_low() {
                    return Err(Error::violation(
                        "qspi",
                        format!("{}: sio not driven for word {} nibble {}", frame.command, i, n),
                    ));
                }
                *nibble = p.sio_o.value();
            }
            let word = assemble_nibbles(nibbles) as u16;
            log::trace!("[qspi] word {} = {:04X}", i, word);
            words.push(word);
        }
        if frame.read_words > 0 {
            p.sck.falling_edge().await;
        }
        Ok(words)
    }

    /// Put each value on `sio_i` and hold it until the next falling edge
    async fn shift_out(&self, values: &[u64]) {
        for &v in values {
            self.pins.sio_i.set(v);
            self.pins.sck.falling_edge().await;
        }
    }

    /// Program one word
    pub async fn prog_word(&self, addr: u32, data: u16) -> Result<()> {
        let frame = self
            .frame(QspiCommand::ProgramWord)
            .with_address(addr)
            .with_payload(&[data]);
        self.transfer(&frame).await.map(drop)
    }

    /// Single bus write, no unlock sequence
    pub async fn write_through(&self, addr: u32, data: u16) -> Result<()> {
        let frame = self
            .frame(QspiCommand::WriteThrough)
            .with_address(addr)
            .with_payload(&[data]);
        self.transfer(&frame).await.map(drop)
    }

    /// Program consecutive words starting at `addr`
    pub async fn page_program(&self, addr: u32, words: &[u16]) -> Result<()> {
        let frame = self
            .frame(QspiCommand::PageProgram)
            .with_address(addr)
            .with_payload(words);
        self.transfer(&frame).await.map(drop)
    }

    /// Erase the sector containing `addr`
    pub async fn erase_sector(&self, addr: u32) -> Result<()> {
        let frame = self.frame(QspiCommand::EraseSector).with_address(addr);
        self.transfer(&frame).await.map(drop)
    }

    /// Erase the whole array
    pub async fn erase_chip(&self) -> Result<()> {
        self.transfer(&self.frame(QspiCommand::EraseChip)).await.map(drop)
    }

    /// Fast read of `count` consecutive words
    pub async fn read_fast(&self, addr: u32, count: usize) -> Result<Vec<u16>> {
        self.read(QspiCommand::FastRead, addr, count).await
    }

    /// Slow read of `count` consecutive words
    pub async fn read_slow(&self, addr: u32, count: usize) -> Result<Vec<u16>> {
        self.read(QspiCommand::SlowRead, addr, count).await
    }

    /// Loopback: the target echoes the low half of `addr`
    pub async fn loopback(&self, addr: u32, count: usize) -> Result<Vec<u16>> {
        self.read(QspiCommand::Loopback, addr, count).await
    }

    async fn read(&self, command: QspiCommand, addr: u32, count: usize) -> Result<Vec<u16>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let frame = self
            .frame(command)
            .with_address(addr)
            .with_read_words(count);
        self.transfer(&frame).await
    }

    /// Enter verify mode
    pub async fn enter_verify_mode(&self) -> Result<()> {
        self.transfer(&self.frame(QspiCommand::EnterVerify)).await.map(drop)
    }

    /// Reset the flash
    pub async fn reset(&self) -> Result<()> {
        self.transfer(&self.frame(QspiCommand::Reset)).await.map(drop)
    }
}
