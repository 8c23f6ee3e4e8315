//! QSPI target bridge
//!
//! Decodes frames on the serial clock and forwards them as Wishbone
//! requests on the local clock, which is unrelated in phase and frequency.
//!
//! Reads prefetch: word 0 is requested as soon as the address is complete,
//! word k+1 as soon as word k starts shifting out. Data goes out on falling
//! edges, the first nibble on the falling edge closing the stall window.
//! Writes are queued and drained in order by a worker, so they can finish
//! after the frame that carried them.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::pin;
use std::rc::Rc;

use futures::future::{select, Either};
use norsim_kernel::{clock_cycles, falling_cycles, Event, JoinHandle, Sim};
use serde::Deserialize;

use super::frame::{ADDRESS_NIBBLES, WORD_NIBBLES};
use super::opcodes::{FrameFlags, Lanes, QspiCommand};
use crate::bus::QspiPins;
use crate::error::{Error, Result};
use crate::nor::CommandSequence;
use crate::wishbone::WishboneMaster;

const BUS: &str = "qspi";

/// Target decoding parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QspiTargetConfig {
    /// Chip select is active high
    pub sce_active_high: bool,
    /// Lanes for the opcode phase
    pub opcode_lanes: Lanes,
}

impl Default for QspiTargetConfig {
    fn default() -> Self {
        Self {
            sce_active_high: true,
            opcode_lanes: Lanes::Single,
        }
    }
}

/// State shared between the frame decoder, the fetcher and the write worker
struct Shared {
    verify_mode: Cell<bool>,
    frames: Cell<u64>,

    writes: RefCell<VecDeque<(u32, u16)>>,
    draining: Cell<bool>,
    work: Event,
    idle: Event,

    fetched: RefCell<Vec<u16>>,
    requested: Cell<u64>,
    request: Event,
    on_bus: Cell<bool>,
    fetch: RefCell<Option<JoinHandle<Result<Infallible>>>>,
}

impl Shared {
    fn writes_idle(&self) -> bool {
        !self.draining.get() && self.writes.borrow().is_empty()
    }
}

/// QSPI slave that turns frames into Wishbone requests
#[derive(Clone)]
pub struct QspiTarget {
    sim: Sim,
    pins: QspiPins,
    wb: WishboneMaster,
    config: QspiTargetConfig,
    shared: Rc<Shared>,
}

impl std::fmt::Debug for QspiTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QspiTarget")
            .field("config", &self.config)
            .field("frames", &self.shared.frames.get())
            .field("verify_mode", &self.shared.verify_mode.get())
            .field("pending_writes", &self.shared.writes.borrow().len())
            .finish()
    }
}

impl QspiTarget {
    /// Create a target; nothing happens until [`QspiTarget::start`]
    pub fn new(sim: &Sim, pins: QspiPins, wb: WishboneMaster, config: QspiTargetConfig) -> Self {
        let idle = sim.event();
        idle.set();
        pins.sio_oe.set(0);
        Self {
            sim: sim.clone(),
            pins,
            wb,
            config,
            shared: Rc::new(Shared {
                verify_mode: Cell::new(false),
                frames: Cell::new(0),
                writes: RefCell::new(VecDeque::new()),
                draining: Cell::new(false),
                work: sim.event(),
                idle,
                fetched: RefCell::new(Vec::new()),
                requested: Cell::new(0),
                request: sim.event(),
                on_bus: Cell::new(false),
                fetch: RefCell::new(None),
            }),
        }
    }

    /// Verify mode was entered
    pub fn verify_mode(&self) -> bool {
        self.shared.verify_mode.get()
    }

    /// Frames decoded so far
    pub fn frames(&self) -> u64 {
        self.shared.frames.get()
    }

    /// Writes queued but not yet issued on Wishbone
    pub fn pending_writes(&self) -> usize {
        self.shared.writes.borrow().len()
    }

    /// Wait until every queued write has been acknowledged
    pub async fn wait_writes_idle(&self) {
        while !self.shared.writes_idle() {
            self.shared.idle.wait().await;
        }
    }

    /// Spawn the frame decoder and the write worker as one task.
    /// It only returns on the first error.
    pub fn start(&self) -> JoinHandle<Result<Infallible>> {
        let this = self.clone();
        self.sim.spawn(async move {
            let frames = pin!(this.serve());
            let writes = pin!(this.drain());
            match select(frames, writes).await {
                Either::Left((result, _)) | Either::Right((result, _)) => result,
            }
        })
    }

    async fn serve(&self) -> Result<Infallible> {
        let active = u64::from(self.config.sce_active_high);
        loop {
            self.pins.sce.wait_for(active).await;
            self.shared.frames.set(self.shared.frames.get() + 1);

            let frame = pin!(self.frame());
            let end = self.pins.sce.edge();
            let result = match select(frame, end).await {
                Either::Left((result, end)) => {
                    if result.is_ok() {
                        end.await;
                    }
                    result
                }
                Either::Right(_) => Ok(()),
            };
            self.end_frame();
            result?;
        }
    }

    fn end_frame(&self) {
        let fetch = self.shared.fetch.borrow_mut().take();
        if let Some(fetch) = fetch {
            if !fetch.is_finished() {
                fetch.kill();
                if self.shared.on_bus.get() {
                    log::debug!("[qspi] frame ended during a fetch, releasing wb");
                    self.shared.on_bus.set(false);
                    self.wb.release();
                }
            }
        }
        self.pins.sio_oe.set(0);
        log::trace!("[qspi] target: frame end");
    }

    async fn frame(&self) -> Result<()> {
        let opcode = self.receive_opcode().await;
        let Some(command) = QspiCommand::from_opcode(opcode) else {
            return Err(Error::violation(BUS, format!("unknown opcode {:02X}h", opcode)));
        };
        let address = if command.flags().contains(FrameFlags::ADDRESS) {
            self.receive_nibbles(ADDRESS_NIBBLES).await as u32
        } else {
            0
        };
        log::debug!("[qspi] target: {} at {:X}", command, address);

        match command {
            QspiCommand::FastRead | QspiCommand::SlowRead => {
                self.start_fetch(address);
                self.serve_read(command, address, false).await
            }
            QspiCommand::Loopback => self.serve_read(command, address, true).await,
            QspiCommand::WriteThrough => {
                let data = self.receive_word().await;
                self.queue(&[(address, data)]);
                Ok(())
            }
            QspiCommand::ProgramWord => {
                let data = self.receive_word().await;
                self.queue(&CommandSequence::Program {
                    addr: address,
                    data,
                }
                .cycles());
                Ok(())
            }
            QspiCommand::PageProgram => {
                clock_cycles(&self.pins.sck, command.stall()).await;
                let mut addr = address;
                loop {
                    let data = self.receive_word().await;
                    self.queue(&CommandSequence::Program { addr, data }.cycles());
                    addr = addr.wrapping_add(1);
                }
            }
            QspiCommand::EraseSector => {
                self.queue(&CommandSequence::SectorErase { addr: address }.cycles());
                Ok(())
            }
            QspiCommand::EraseChip => {
                self.queue(&CommandSequence::ChipErase.cycles());
                Ok(())
            }
            QspiCommand::Reset => {
                self.queue(&CommandSequence::Reset.cycles());
                Ok(())
            }
            QspiCommand::EnterVerify => {
                log::debug!("[qspi] target: verify mode");
                self.shared.verify_mode.set(true);
                Ok(())
            }
        }
    }

    async fn receive_opcode(&self) -> u8 {
        match self.config.opcode_lanes {
            Lanes::Single => {
                let mut opcode = 0u8;
                for _ in 0..8 {
                    self.pins.sck.rising_edge().await;
                    opcode = (opcode << 1) | (self.pins.sio_i.value() & 1) as u8;
                }
                opcode
            }
            Lanes::Quad => self.receive_nibbles(2).await as u8,
        }
    }

    async fn receive_nibbles(&self, count: u32) -> u64 {
        let mut value = 0;
        for _ in 0..count {
            self.pins.sck.rising_edge().await;
            value = (value << 4) | (self.pins.sio_i.value() & 0xF);
        }
        value
    }

    async fn receive_word(&self) -> u16 {
        self.receive_nibbles(WORD_NIBBLES).await as u16
    }

    /// Drive read data until the frame ends. Called right after the last
    /// address edge.
    async fn serve_read(&self, command: QspiCommand, address: u32, loopback: bool) -> Result<()> {
        let p = &self.pins;
        falling_cycles(&p.sck, command.stall() + 1).await;

        let mut k = 0u64;
        loop {
            let word = if loopback {
                Some(address as u16)
            } else {
                self.shared.fetched.borrow().get(k as usize).copied()
            };
            let Some(word) = word else {
                return self.underrun(k).await;
            };
            if !loopback {
                self.shared.requested.set(k + 2);
                self.shared.request.set();
            }
            log::trace!("[qspi] target: word {} = {:04X}", k, word);

            for i in (0..WORD_NIBBLES).rev() {
                if i != WORD_NIBBLES - 1 {
                    p.sck.falling_edge().await;
                }
                p.sio_o.set(u64::from(word >> (4 * i)) & 0xF);
                p.sio_oe.set(1);
            }
            p.sck.falling_edge().await;
            k += 1;
        }
    }

    /// Word `k` is not there when it has to go out. Stop driving; if the
    /// host samples anyway the frame fails.
    async fn underrun(&self, k: u64) -> Result<()> {
        self.pins.sio_oe.set(0);
        let failed = {
            let fetch = self.shared.fetch.borrow();
            fetch
                .as_ref()
                .filter(|h| h.is_finished())
                .and_then(|h| h.take_output())
        };
        if let Some(Err(e)) = failed {
            return Err(e);
        }
        self.pins.sck.rising_edge().await;
        log::warn!("[qspi] target: read data for word {} not ready", k);
        Err(Error::violation(BUS, format!("read underrun at word {}", k)))
    }

    fn start_fetch(&self, address: u32) {
        let s = &self.shared;
        s.fetched.borrow_mut().clear();
        s.requested.set(1);
        let this = self.clone();
        let handle = self.sim.spawn(async move { this.fetch(address).await });
        let stale = s.fetch.borrow_mut().replace(handle);
        if let Some(stale) = stale {
            stale.kill();
        }
    }

    async fn fetch(&self, address: u32) -> Result<Infallible> {
        let s = &self.shared;
        self.wait_writes_idle().await;
        let mut k = 0u64;
        loop {
            while s.requested.get() <= k {
                s.request.clear();
                s.request.wait().await;
            }
            s.on_bus.set(true);
            let word = self.wb.read(u64::from(address) + k, None).await?;
            s.on_bus.set(false);
            s.fetched.borrow_mut().push(word as u16);
            k += 1;
        }
    }

    fn queue(&self, writes: &[(u32, u16)]) {
        let s = &self.shared;
        s.writes.borrow_mut().extend(writes.iter().copied());
        s.idle.clear();
        s.work.set();
    }

    async fn drain(&self) -> Result<Infallible> {
        let s = &self.shared;
        loop {
            let next = s.writes.borrow_mut().pop_front();
            match next {
                Some((addr, data)) => {
                    s.draining.set(true);
                    log::trace!("[qspi] target: write {:X} = {:04X}", addr, data);
                    self.wb.write(u64::from(addr), u64::from(data), None).await?;
                }
                None => {
                    s.draining.set(false);
                    s.idle.set();
                    s.work.clear();
                    s.work.wait().await;
                }
            }
        }
    }
}
