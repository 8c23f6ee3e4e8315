//! Behavioural x16 NOR flash device
//!
//! The device watches the NOR pins like the real part would: a falling
//! chip enable starts an access, the write path latches address and data
//! after the write pulse width, the read path drives data after the access
//! time and keeps following address changes (with page-mode timing) until
//! the chip or the outputs are deselected.
//!
//! Program and erase commands start an independently scheduled busy
//! timeline that drives the ready/busy pin.

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use futures::future::{select, Either};
use norsim_kernel::time::{ns, Pretty};
use norsim_kernel::{JoinHandle, Sim, SimTime};

use super::array::{word_addr, NorArray, Word};
use super::cfi::CfiTable;
use super::command::{CommandEffect, CommandInterpreter, CommandState};
use super::timing::{MutationPolicy, NorGeometry, NorTiming, ReadWhileBusy};
use crate::bus::NorPins;
use crate::error::{Error, Result};

const BUS: &str = "flash";

/// Bus interface state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusState {
    /// Waiting for chip enable
    #[default]
    Idle,
    /// Enforcing the minimum chip-disable time after a write
    Recovery,
    /// An access is in progress
    Busy,
}

/// Which data the read path returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Overlay {
    /// Array content
    #[default]
    Array,
    /// CFI table
    Cfi,
}

/// Snapshot of the device state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    /// Bus interface state
    pub bus: BusState,
    /// Command decoder state
    pub command: CommandState,
    /// Read overlay
    pub overlay: Overlay,
    /// An operation is in progress
    pub busy: bool,
    /// When ready/busy returns high, if busy
    pub busy_until: Option<SimTime>,
}

/// Everything that configures a device instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NorParams {
    /// Array geometry
    pub geometry: NorGeometry,
    /// Timing
    pub timing: NorTiming,
    /// When array mutations become visible
    pub mutation: MutationPolicy,
    /// Read-while-busy behaviour
    pub read_while_busy: ReadWhileBusy,
}

#[derive(Debug, Clone)]
enum Mutation {
    Program(Vec<(u32, u16)>),
    EraseSector(u32),
    EraseChip,
}

struct NorDevice {
    array: NorArray<u16>,
    cfi: CfiTable,
    cmd: CommandInterpreter,
    bus_state: BusState,
    overlay: Overlay,
    busy: bool,
    busy_until: Option<SimTime>,
    busy_task: Option<JoinHandle<()>>,
    params: NorParams,
}

impl NorDevice {
    fn read(&self, addr: u32) -> Result<u16> {
        match self.overlay {
            Overlay::Cfi => {
                let data = self.cfi.read(addr);
                log::debug!("[flash] read CFI @{:07X}h = {:04X}", addr, data);
                Ok(data)
            }
            Overlay::Array => {
                let data = self.array.read(addr)?;
                log::debug!("[flash] read @{:07X}h = {:04X}", addr, data);
                Ok(data)
            }
        }
    }

    fn check(&self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::Program(words) => words
                .iter()
                .try_for_each(|(addr, _)| self.array.check(*addr)),
            Mutation::EraseSector(addr) => self.array.check(*addr),
            Mutation::EraseChip => Ok(()),
        }
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::Program(words) => {
                for (addr, data) in words {
                    self.array.program(*addr, *data)?;
                }
                Ok(())
            }
            Mutation::EraseSector(addr) => self.array.erase(*addr),
            Mutation::EraseChip => {
                self.array.erase_all();
                Ok(())
            }
        }
    }

    fn reset(&mut self) {
        if let Some(task) = self.busy_task.take() {
            task.kill();
        }
        self.cmd.reset();
        self.bus_state = BusState::Idle;
        self.overlay = Overlay::Array;
        self.busy = false;
        self.busy_until = None;
    }
}

/// Handle to a NOR flash model attached to a set of pins
///
/// Cloning yields another handle to the same device.
#[derive(Clone)]
pub struct NorFlash {
    dev: Rc<RefCell<NorDevice>>,
    sim: Sim,
    pins: NorPins,
}

impl NorFlash {
    /// Create a device with erased content
    pub fn new(sim: &Sim, pins: NorPins, params: NorParams) -> Result<Self> {
        let g = params.geometry;
        let array = NorArray::new(g.size, g.erase_size)?;
        if !params.timing.page_words.is_power_of_two() {
            return Err(Error::Config(format!(
                "page size ({}) must be a power of two",
                params.timing.page_words
            )));
        }
        let dev = NorDevice {
            array,
            cfi: CfiTable::new(&g, &params.timing),
            cmd: CommandInterpreter::new(g.erase_size, g.write_buffer_words),
            bus_state: BusState::Idle,
            overlay: Overlay::Array,
            busy: false,
            busy_until: None,
            busy_task: None,
            params,
        };
        Ok(Self {
            dev: Rc::new(RefCell::new(dev)),
            sim: sim.clone(),
            pins,
        })
    }

    /// Pins the device is attached to
    pub fn pins(&self) -> &NorPins {
        &self.pins
    }

    /// Start the bus interface task
    ///
    /// The task only ends on a fatal error; kill the handle (and call
    /// [`NorFlash::reset`] to stop pending busy timers) to shut it down.
    pub fn start(&self) -> JoinHandle<Result<Infallible>> {
        let this = self.clone();
        self.sim.spawn(async move { this.run().await })
    }

    /// Hardware reset: cancel busy timers and return to defaults
    pub fn reset(&self) {
        log::debug!("[flash] hardware reset");
        self.dev.borrow_mut().reset();
        self.pins.ry.set(1);
    }

    /// Current state
    pub fn state(&self) -> DeviceState {
        let d = self.dev.borrow();
        DeviceState {
            bus: d.bus_state,
            command: d.cmd.state(),
            overlay: d.overlay,
            busy: d.busy,
            busy_until: d.busy_until,
        }
    }

    /// An operation is in progress
    pub fn is_busy(&self) -> bool {
        self.dev.borrow().busy
    }

    /// Array content, bypassing the bus
    pub fn peek(&self, addr: u32) -> Result<u16> {
        self.dev.borrow().array.read(addr)
    }

    /// Program the array directly, bypassing the bus and busy timing
    pub fn preload(&self, addr: u32, data: &[u16]) -> Result<()> {
        let mut d = self.dev.borrow_mut();
        let size = d.array.size();
        for (i, w) in data.iter().enumerate() {
            d.array.program(word_addr(addr, i, size)?, *w)?;
        }
        Ok(())
    }

    /// Array geometry
    pub fn geometry(&self) -> NorGeometry {
        self.dev.borrow().params.geometry
    }

    fn timing(&self) -> NorTiming {
        self.dev.borrow().params.timing
    }

    fn set_bus_state(&self, state: BusState) {
        self.dev.borrow_mut().bus_state = state;
    }

    fn selected(&self) -> bool {
        self.pins.ce.is_low() && self.pins.oe.is_low()
    }

    async fn run(self) -> Result<Infallible> {
        log::debug!("[flash] startup");
        self.dev.borrow_mut().reset();
        self.pins.ry.set(1);

        loop {
            let state = self.dev.borrow().bus_state;
            match state {
                BusState::Idle => self.idle().await?,
                BusState::Recovery => {
                    self.sim.timer(self.timing().t_ceh).await;
                    self.set_bus_state(BusState::Idle);
                }
                BusState::Busy => self.set_bus_state(BusState::Idle),
            }
        }
    }

    async fn idle(&self) -> Result<()> {
        self.pins.ce.falling_edge().await;
        self.sim.settle().await;
        if self.pins.ce.is_high() {
            return Ok(());
        }

        let write = self.pins.we.is_low();
        let read = self.pins.oe.is_low();
        log::trace!("[flash] request we={} oe={}", write, read);
        if write && read {
            return Err(Error::violation(BUS, "WE# and OE# asserted together"));
        }

        if write && !self.is_busy() {
            self.set_bus_state(BusState::Busy);
            self.sim.timer(self.timing().t_wp).await;
            if self.pins.doe.is_low() {
                return Err(Error::violation(
                    BUS,
                    "write latched while the controller is not driving the data bus",
                ));
            }
            let addr = self.pins.addr.value() as u32;
            let data = u16::from_u64(self.pins.data_o.value());
            self.command_cycle(addr, data)?;
            self.set_bus_state(BusState::Recovery);
        } else if read {
            self.set_bus_state(BusState::Busy);
            self.read_access().await?;
            self.set_bus_state(BusState::Idle);
        } else if write {
            log::warn!("[flash] write cycle while busy ignored");
        }
        Ok(())
    }

    async fn read_access(&self) -> Result<()> {
        let t = self.timing();
        let ce = &self.pins.ce;
        let oe = &self.pins.oe;

        log::trace!("[flash] read request @{:07X}h", self.pins.addr.value());
        // Worst case access time, unless deselected first
        select(
            self.sim.timer(t.t_acc),
            select(ce.rising_edge(), oe.rising_edge()),
        )
        .await;
        if !self.selected() {
            return Ok(());
        }
        self.drive_read()?;
        let mut last = self.pins.addr.value() as u32;

        loop {
            select(
                self.pins.addr.edge(),
                select(ce.rising_edge(), oe.rising_edge()),
            )
            .await;
            self.sim.timer(ns(1)).await;
            if !self.selected() {
                return Ok(());
            }
            let addr = self.pins.addr.value() as u32;
            let access = if t.page_of(addr) == t.page_of(last) {
                t.t_pacc
            } else {
                t.t_acc
            };
            match select(
                self.sim.timer(access),
                select(ce.rising_edge(), oe.rising_edge()),
            )
            .await
            {
                Either::Left(_) => {}
                Either::Right(_) => return Ok(()),
            }
            self.drive_read()?;
            last = self.pins.addr.value() as u32;
        }
    }

    fn drive_read(&self) -> Result<()> {
        if self.pins.doe.is_high() {
            return Err(Error::violation(
                BUS,
                "read access while the controller drives the data bus",
            ));
        }
        let addr = self.pins.addr.value() as u32;
        let d = self.dev.borrow();
        if d.busy {
            match d.params.read_while_busy {
                ReadWhileBusy::Fail => {
                    return Err(Error::Unimplemented("status read while busy"));
                }
                ReadWhileBusy::ArrayData => {
                    log::warn!("[flash] read while busy, returning array data");
                }
            }
        }
        let data = d.read(addr)?;
        self.pins.data_i.set(data.to_u64());
        Ok(())
    }

    fn command_cycle(&self, addr: u32, data: u16) -> Result<()> {
        let effect = self.dev.borrow_mut().cmd.cycle(addr, data);
        let t = self.timing();
        match effect {
            CommandEffect::None => Ok(()),
            CommandEffect::Reset => {
                log::debug!("[flash] received cmd reset");
                let mut d = self.dev.borrow_mut();
                d.overlay = Overlay::Array;
                d.busy = false;
                Ok(())
            }
            CommandEffect::EnterCfi => {
                log::debug!("[flash] received cmd cfi enter");
                self.dev.borrow_mut().overlay = Overlay::Cfi;
                Ok(())
            }
            CommandEffect::Program { addr, data } => {
                log::debug!("[flash] received cmd program {:X} = {:04X}", addr, data);
                self.start_operation(Mutation::Program(vec![(addr, data)]), t.busy_program)
            }
            CommandEffect::ProgramBuffer(words) => {
                log::debug!("[flash] received cmd write buffer, {} words", words.len());
                self.start_operation(Mutation::Program(words), t.busy_buffer_program)
            }
            CommandEffect::EraseSector(addr) => {
                log::debug!("[flash] received cmd erase sector {:X}", addr);
                self.start_operation(Mutation::EraseSector(addr), t.busy_erase_sector)
            }
            CommandEffect::EraseChip => {
                log::debug!("[flash] received cmd erase chip");
                self.start_operation(Mutation::EraseChip, t.busy_erase_chip)
            }
        }
    }

    fn start_operation(&self, mutation: Mutation, op_time: SimTime) -> Result<()> {
        let t_busy = self.timing().t_busy;
        {
            let mut d = self.dev.borrow_mut();
            d.check(&mutation)?;
            if d.params.mutation == MutationPolicy::Immediate {
                d.apply(&mutation)?;
            }
            d.busy = true;
            d.busy_until = Some(self.sim.now() + t_busy + op_time);
        }

        let dev = Rc::clone(&self.dev);
        let ry = self.pins.ry.clone();
        let sim = self.sim.clone();
        let task = self.sim.spawn(async move {
            sim.timer(t_busy).await;
            ry.set(0);
            log::debug!("[flash] busy for {}", Pretty(op_time));
            sim.timer(op_time).await;
            let mut d = dev.borrow_mut();
            if d.params.mutation == MutationPolicy::OnReady {
                if let Err(e) = d.apply(&mutation) {
                    log::error!("[flash] deferred operation failed: {}", e);
                }
            }
            d.busy = false;
            d.busy_until = None;
            ry.set(1);
            log::debug!("[flash] ready");
        });
        if let Some(old) = self.dev.borrow_mut().busy_task.replace(task) {
            old.kill();
        }
        Ok(())
    }
}

impl std::fmt::Debug for NorFlash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NorFlash")
            .field("state", &self.state())
            .finish()
    }
}
