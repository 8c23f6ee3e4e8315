//! NOR bus initiator
//!
//! Drives the controller side of the NOR pins with timing that satisfies
//! the device model: write pulses longer than tWP, deselect gaps longer
//! than tCEH, and sample points after tACC / tPACC.

use norsim_kernel::time::ns;
use norsim_kernel::{with_timeout, Sim, SimTime};
use serde::Deserialize;

use super::command::CommandSequence;
use super::timing::NorTiming;
use crate::bus::NorPins;
use crate::error::Result;

/// Controller-side bus timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NorBusTiming {
    /// WE# low time, ns
    pub write_pulse_ns: u64,
    /// CE#/OE# low to data sample, ns
    pub access_ns: u64,
    /// Address change to data sample within a page, ns
    pub page_access_ns: u64,
    /// CE# high time between accesses, ns
    pub deselect_ns: u64,
}

impl Default for NorBusTiming {
    fn default() -> Self {
        Self {
            write_pulse_ns: 50,
            access_ns: 200,
            page_access_ns: 40,
            deselect_ns: 50,
        }
    }
}

/// Drives reads and writes onto [`NorPins`]
#[derive(Debug, Clone)]
pub struct NorBusMaster {
    sim: Sim,
    pins: NorPins,
    timing: NorBusTiming,
    page_words: u32,
}

impl NorBusMaster {
    /// Create a bus master; `device` is used for page boundaries
    pub fn new(sim: &Sim, pins: NorPins, timing: NorBusTiming, device: &NorTiming) -> Self {
        Self {
            sim: sim.clone(),
            pins,
            timing,
            page_words: device.page_words,
        }
    }

    /// Pins driven by this master
    pub fn pins(&self) -> &NorPins {
        &self.pins
    }

    fn same_page(&self, a: u32, b: u32) -> bool {
        let shift = self.page_words.max(1).trailing_zeros();
        a >> shift == b >> shift
    }

    /// One write cycle
    pub async fn write(&self, addr: u32, data: u16) {
        let p = &self.pins;
        log::trace!("[nor] write {:X} = {:04X}", addr, data);
        p.addr.set(u64::from(addr));
        p.data_o.set(u64::from(data));
        p.doe.set(1);
        p.ce.set(0);
        p.we.set(0);
        self.sim.timer(ns(self.timing.write_pulse_ns)).await;
        p.we.set(1);
        p.ce.set(1);
        self.sim.timer(ns(self.timing.deselect_ns)).await;
        p.doe.set(0);
    }

    /// One read cycle
    pub async fn read(&self, addr: u32) -> u16 {
        let p = &self.pins;
        p.addr.set(u64::from(addr));
        p.doe.set(0);
        p.ce.set(0);
        p.oe.set(0);
        self.sim.timer(ns(self.timing.access_ns)).await;
        let data = p.data_i.value() as u16;
        p.oe.set(1);
        p.ce.set(1);
        self.sim.timer(ns(self.timing.deselect_ns)).await;
        log::trace!("[nor] read {:X} = {:04X}", addr, data);
        data
    }

    /// Read `count` consecutive words keeping CE#/OE# asserted, using
    /// page-mode timing while the address stays in one page
    pub async fn read_page(&self, addr: u32, count: usize) -> Vec<u16> {
        let p = &self.pins;
        let mut out = Vec::with_capacity(count);
        if count == 0 {
            return out;
        }
        p.addr.set(u64::from(addr));
        p.doe.set(0);
        p.ce.set(0);
        p.oe.set(0);
        self.sim.timer(ns(self.timing.access_ns)).await;
        out.push(p.data_i.value() as u16);

        let mut last = addr;
        for i in 1..count as u32 {
            let a = addr + i;
            p.addr.set(u64::from(a));
            let wait = if self.same_page(a, last) {
                self.timing.page_access_ns
            } else {
                self.timing.access_ns
            };
            self.sim.timer(ns(wait)).await;
            out.push(p.data_i.value() as u16);
            last = a;
        }
        p.oe.set(1);
        p.ce.set(1);
        self.sim.timer(ns(self.timing.deselect_ns)).await;
        out
    }

    /// Issue every bus write of a command
    pub async fn issue(&self, command: &CommandSequence) {
        log::debug!("[nor] issue {:?}", command);
        for (addr, data) in command.cycles() {
            self.write(addr, data).await;
        }
    }

    /// Wait until ready/busy is low
    pub async fn wait_busy(&self, timeout: SimTime) -> Result<()> {
        with_timeout(&self.sim, self.pins.ry.wait_for(0), timeout, self.pins.ry.name()).await?;
        Ok(())
    }

    /// Wait until ready/busy is high
    pub async fn wait_ready(&self, timeout: SimTime) -> Result<()> {
        with_timeout(&self.sim, self.pins.ry.wait_for(1), timeout, self.pins.ry.name()).await?;
        Ok(())
    }
}
