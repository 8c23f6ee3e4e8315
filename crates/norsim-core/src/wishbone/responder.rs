//! Wishbone responder stubs
//!
//! All stubs share one per-edge engine driven by a [`Script`]. On every
//! rising clock edge the engine looks at the pre-edge bus values:
//!
//! - `rst` high or `cyc` low resets it (aborting any stalled request),
//! - a stalled request counts down and is acknowledged when it reaches zero,
//! - otherwise `cyc && stb && !stall` accepts a new request, which is
//!   checked against the script and either acknowledged on the next edge or
//!   stalled for `stall_cycles` edges first.

use std::collections::VecDeque;
use std::rc::Rc;

use norsim_kernel::{with_timeout, Sim, SimTime};

use super::{BusTransaction, MonitorLog};
use crate::bus::WishbonePins;
use crate::error::{Error, Result};

const BUS: &str = "wb";

/// Reply function of a monitor: read data for an address
pub type ReplyFn = Rc<dyn Fn(u64) -> u64>;

/// What a responder stub expects and how it answers
pub enum Script {
    /// Exactly one read of `address`, answered with `data`
    ExpectRead {
        /// Expected address
        address: u64,
        /// Read data to return
        data: u64,
    },
    /// Exactly one write of `data` to `address`
    ExpectWrite {
        /// Expected address
        address: u64,
        /// Expected write data
        data: u64,
    },
    /// Reads of the given (address, data) pairs, in order
    ReadSequence(Vec<(u64, u64)>),
    /// Writes of the given (address, data) pairs, in order
    WriteSequence(Vec<(u64, u64)>),
    /// Acknowledge every request forever, recording it
    Monitor {
        /// Read data for a read address
        reply: ReplyFn,
        /// Where requests are recorded
        log: MonitorLog,
    },
    /// Fail as soon as a strobe is seen
    Nothing,
}

/// Stall and timeout options of a stub
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StubOptions {
    /// Edges to hold `stall` after accepting a request
    pub stall_cycles: u32,
    /// Bound on the whole exchange
    pub timeout: Option<SimTime>,
}

impl StubOptions {
    /// Options with a stall count and no timeout
    pub fn stall(stall_cycles: u32) -> Self {
        Self {
            stall_cycles,
            timeout: None,
        }
    }

    /// Add a timeout
    pub fn with_timeout(mut self, timeout: SimTime) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Expectation {
    address: u64,
    write: bool,
    data: u64,
}

enum Mode {
    Expect(VecDeque<Expectation>),
    Monitor(ReplyFn, MonitorLog),
    Nothing,
}

impl From<Script> for Mode {
    fn from(script: Script) -> Self {
        let reads = |pairs: Vec<(u64, u64)>| {
            pairs
                .into_iter()
                .map(|(address, data)| Expectation {
                    address,
                    write: false,
                    data,
                })
                .collect::<VecDeque<_>>()
        };
        let writes = |pairs: Vec<(u64, u64)>| {
            pairs
                .into_iter()
                .map(|(address, data)| Expectation {
                    address,
                    write: true,
                    data,
                })
                .collect::<VecDeque<_>>()
        };
        match script {
            Script::ExpectRead { address, data } => Mode::Expect(reads(vec![(address, data)])),
            Script::ExpectWrite { address, data } => Mode::Expect(writes(vec![(address, data)])),
            Script::ReadSequence(pairs) => Mode::Expect(reads(pairs)),
            Script::WriteSequence(pairs) => Mode::Expect(writes(pairs)),
            Script::Monitor { reply, log } => Mode::Monitor(reply, log),
            Script::Nothing => Mode::Nothing,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Pending {
    Idle,
    Stalling { remaining: u32, reply: u64 },
}

/// Responder side of a Wishbone bus
#[derive(Debug, Clone)]
pub struct WishboneResponder {
    sim: Sim,
    pins: WishbonePins,
}

impl WishboneResponder {
    /// Create a responder on `pins`
    pub fn new(sim: &Sim, pins: WishbonePins) -> Self {
        Self {
            sim: sim.clone(),
            pins,
        }
    }

    /// Run a script. Expectation scripts return once the last request was
    /// acknowledged; monitor and nothing scripts only return on failure.
    pub async fn run(&self, script: Script, opts: StubOptions) -> Result<()> {
        let mode = Mode::from(script);
        match opts.timeout {
            Some(t) => {
                with_timeout(&self.sim, self.engine(mode, opts), t, self.pins.stb.name()).await?
            }
            None => self.engine(mode, opts).await,
        }
    }

    /// Expect one read
    pub async fn expect_read(&self, address: u64, data: u64, opts: StubOptions) -> Result<()> {
        self.run(Script::ExpectRead { address, data }, opts).await
    }

    /// Expect one write
    pub async fn expect_write(&self, address: u64, data: u64, opts: StubOptions) -> Result<()> {
        self.run(Script::ExpectWrite { address, data }, opts).await
    }

    /// Expect a sequence of reads
    pub async fn expect_read_sequence(
        &self,
        pairs: &[(u64, u64)],
        opts: StubOptions,
    ) -> Result<()> {
        self.run(Script::ReadSequence(pairs.to_vec()), opts).await
    }

    /// Expect a sequence of writes
    pub async fn expect_write_sequence(
        &self,
        pairs: &[(u64, u64)],
        opts: StubOptions,
    ) -> Result<()> {
        self.run(Script::WriteSequence(pairs.to_vec()), opts).await
    }

    /// Acknowledge everything after `stall_cycles`, answering reads with
    /// `reply(address)` and recording every request in `log`
    pub async fn monitor(
        &self,
        reply: impl Fn(u64) -> u64 + 'static,
        stall_cycles: u32,
        log: MonitorLog,
    ) -> Result<()> {
        let script = Script::Monitor {
            reply: Rc::new(reply),
            log,
        };
        self.run(script, StubOptions::stall(stall_cycles)).await
    }

    /// Fail on the first strobe
    pub async fn expect_nothing(&self) -> Result<()> {
        self.run(Script::Nothing, StubOptions::default()).await
    }

    async fn engine(&self, mut mode: Mode, opts: StubOptions) -> Result<()> {
        let p = &self.pins;
        p.stall.set(0);
        p.ack.set(0);
        let mut pending = Pending::Idle;

        loop {
            p.clk.rising_edge().await;

            if let Mode::Nothing = mode {
                if p.stb.is_high() {
                    return Err(Error::violation(
                        BUS,
                        format!("unexpected request at {:X}", p.adr.value()),
                    ));
                }
                continue;
            }

            if p.rst.is_high() || p.cyc.is_low() {
                if let Pending::Stalling { .. } = pending {
                    log::debug!("[wb] stub: cycle dropped, request aborted");
                }
                pending = Pending::Idle;
                p.stall.set(0);
                p.ack.set(0);
                continue;
            }

            let mut respond = None;
            match pending {
                Pending::Stalling { remaining, reply } => {
                    if remaining <= 1 {
                        respond = Some(reply);
                        pending = Pending::Idle;
                    } else {
                        pending = Pending::Stalling {
                            remaining: remaining - 1,
                            reply,
                        };
                    }
                }
                Pending::Idle => {
                    if p.stb.is_high() && p.stall.is_low() {
                        let reply = self.accept(&mut mode, opts.stall_cycles)?;
                        if opts.stall_cycles == 0 {
                            respond = Some(reply);
                        } else {
                            log::trace!("[wb] stub: stalling for {} cycles", opts.stall_cycles);
                            p.stall.set(1);
                            pending = Pending::Stalling {
                                remaining: opts.stall_cycles,
                                reply,
                            };
                        }
                    }
                }
            }

            match respond {
                Some(reply) => {
                    p.rdata.set(reply);
                    p.stall.set(0);
                    p.ack.set(1);
                    if let Mode::Expect(queue) = &mode {
                        if queue.is_empty() {
                            p.clk.rising_edge().await;
                            p.ack.set(0);
                            return Ok(());
                        }
                    }
                }
                None => p.ack.set(0),
            }
        }
    }

    /// Check a freshly accepted request; returns the read data to answer with
    fn accept(&self, mode: &mut Mode, stall_cycles: u32) -> Result<u64> {
        let p = &self.pins;
        let address = p.adr.value();
        let write = p.we.is_high();
        let wdata = p.wdata.value();

        match mode {
            Mode::Expect(queue) => {
                let Some(exp) = queue.pop_front() else {
                    return Err(Error::violation(
                        BUS,
                        format!("request at {:X} after the last expected one", address),
                    ));
                };
                if exp.write != write {
                    return Err(Error::violation(
                        BUS,
                        format!(
                            "expected a {} at {:X}, got a {} at {:X}",
                            if exp.write { "write" } else { "read" },
                            exp.address,
                            if write { "write" } else { "read" },
                            address
                        ),
                    ));
                }
                if exp.address != address {
                    return Err(Error::violation(
                        BUS,
                        format!("expected address {:X}, got {:X}", exp.address, address),
                    ));
                }
                if write && exp.data != wdata {
                    return Err(Error::violation(
                        BUS,
                        format!(
                            "write to {:X}: expected data {:X}, got {:X}",
                            address, exp.data, wdata
                        ),
                    ));
                }
                log::debug!(
                    "[wb] stub: {} {:X} ok",
                    if write { "write" } else { "read" },
                    address
                );
                Ok(if write { 0 } else { exp.data })
            }
            Mode::Monitor(reply, record) => {
                let rdata = (!write).then(|| reply(address));
                if write {
                    log::debug!("[wb] stub: write {:X} to {:X}", wdata, address);
                } else {
                    log::debug!("[wb] stub: read from {:X}", address);
                }
                record.push(BusTransaction {
                    address,
                    write,
                    wdata: if write { wdata } else { 0 },
                    rdata,
                    ack_latency: stall_cycles + 1,
                });
                Ok(rdata.unwrap_or(0))
            }
            Mode::Nothing => Err(Error::violation(BUS, "unexpected request")),
        }
    }
}
