//! Wishbone initiator

use std::cell::Cell;
use std::rc::Rc;

use futures::future::try_join;
use norsim_kernel::{clock_cycles, with_timeout, Sim, SimTime};

use super::BusTransaction;
use crate::bus::WishbonePins;
use crate::error::{Error, Result};

const BUS: &str = "wb";

/// Marks the master busy for as long as it lives; a killed task drops it
struct Active(Rc<Cell<bool>>);

impl Drop for Active {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Issues requests on a set of [`WishbonePins`]
///
/// Clones share the in-progress flag, so a second request started from
/// another task while one is open fails with
/// [`Error::TransactionInProgress`]. A request is also refused while `cyc`
/// is held by another initiator on the same pins.
#[derive(Debug, Clone)]
pub struct WishboneMaster {
    sim: Sim,
    pins: WishbonePins,
    active: Rc<Cell<bool>>,
    /// When this master last dropped `cyc`
    released_at: Rc<Cell<Option<SimTime>>>,
}

impl WishboneMaster {
    /// Create a master. The lines are driven idle unless another
    /// initiator has a cycle open.
    pub fn new(sim: &Sim, pins: WishbonePins) -> Self {
        let master = Self {
            sim: sim.clone(),
            pins,
            active: Rc::new(Cell::new(false)),
            released_at: Rc::new(Cell::new(None)),
        };
        if master.pins.cyc.is_low() {
            master.drive_idle();
        }
        master
    }

    /// Pins driven by this master
    pub fn pins(&self) -> &WishbonePins {
        &self.pins
    }

    /// A request is open
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    fn begin(&self) -> Result<Active> {
        if self.active.get() {
            return Err(Error::TransactionInProgress(BUS));
        }
        // Our own drop of `cyc` only commits at the end of the delta
        let own_release = self.released_at.get() == Some(self.sim.now());
        if self.pins.cyc.is_high() && !own_release {
            log::debug!("[wb] cyc held by another initiator");
            return Err(Error::TransactionInProgress(BUS));
        }
        self.active.set(true);
        Ok(Active(Rc::clone(&self.active)))
    }

    fn drive_idle(&self) {
        self.pins.cyc.set(0);
        self.pins.stb.set(0);
        self.pins.we.set(0);
        self.released_at.set(Some(self.sim.now()));
    }

    /// Return every initiator line to idle and forget any open request.
    /// Used after killing a task that was in the middle of a request.
    pub fn release(&self) {
        log::trace!("[wb] release");
        self.drive_idle();
        self.active.set(false);
    }

    /// Hold the current request until an edge with `stall` low.
    /// Returns the number of edges waited.
    async fn wait_accept(&self) -> u32 {
        let mut edges = 0;
        loop {
            self.pins.clk.rising_edge().await;
            edges += 1;
            if self.pins.stall.is_low() {
                return edges;
            }
        }
    }

    /// Wait for an edge with `ack` high. Returns the number of edges waited.
    async fn wait_ack(&self) -> u32 {
        let mut edges = 0;
        loop {
            self.pins.clk.rising_edge().await;
            edges += 1;
            if self.pins.ack.is_high() {
                return edges;
            }
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = T>,
        timeout: Option<SimTime>,
    ) -> Result<T> {
        match timeout {
            Some(t) => Ok(with_timeout(&self.sim, fut, t, self.pins.ack.name()).await?),
            None => Ok(fut.await),
        }
    }

    /// One complete request. `write` carries the write data; `None` reads.
    pub async fn transaction(
        &self,
        address: u64,
        write: Option<u64>,
        timeout: Option<SimTime>,
    ) -> Result<BusTransaction> {
        let _active = self.begin()?;
        let p = &self.pins;

        p.adr.set(address);
        p.we.set_bool(write.is_some());
        if let Some(data) = write {
            p.wdata.set(data);
        }
        p.cyc.set(1);
        p.stb.set(1);

        let latency = self
            .bounded(
                async {
                    self.wait_accept().await;
                    p.stb.set(0);
                    self.wait_ack().await
                },
                timeout,
            )
            .await;
        let latency = match latency {
            Ok(l) => l,
            Err(e) => {
                self.drive_idle();
                return Err(e);
            }
        };

        let rdata = write.is_none().then(|| p.rdata.value());
        self.drive_idle();

        let txn = BusTransaction {
            address,
            write: write.is_some(),
            wdata: write.unwrap_or(0),
            rdata,
            ack_latency: latency,
        };
        log::debug!("[wb] {:?}", txn);
        Ok(txn)
    }

    /// Single read
    pub async fn read(&self, address: u64, timeout: Option<SimTime>) -> Result<u64> {
        let txn = self.transaction(address, None, timeout).await?;
        Ok(txn.rdata.unwrap_or_default())
    }

    /// Single write
    pub async fn write(&self, address: u64, data: u64, timeout: Option<SimTime>) -> Result<()> {
        self.transaction(address, Some(data), timeout).await?;
        Ok(())
    }

    /// Pipelined reads in one cycle
    ///
    /// Requests are issued back to back while responses are collected
    /// concurrently; the Nth response is paired with the Nth address.
    pub async fn multi_read(
        &self,
        addresses: &[u64],
        timeout: Option<SimTime>,
    ) -> Result<Vec<(u64, u64)>> {
        let _active = self.begin()?;
        let p = &self.pins;
        p.cyc.set(1);
        p.we.set(0);

        let send = async {
            for &a in addresses {
                log::trace!("[wb] multi_read stb a={:X}", a);
                p.adr.set(a);
                p.stb.set(1);
                self.wait_accept().await;
            }
            p.stb.set(0);
            Ok::<_, Error>(())
        };
        let collect = async {
            let mut data = Vec::with_capacity(addresses.len());
            for i in 0..addresses.len() {
                self.bounded(self.wait_ack(), timeout).await?;
                let d = p.rdata.value();
                log::trace!("[wb] multi_read {}: dat={:04X}", i, d);
                data.push(d);
            }
            Ok::<_, Error>(data)
        };

        let result = try_join(send, collect).await;
        self.drive_idle();
        let ((), data) = result?;
        Ok(addresses.iter().copied().zip(data).collect())
    }

    /// Start a read and drop `cyc` `after_cycles` edges after the request
    /// was accepted, before waiting for its acknowledge. `timeout` bounds
    /// the wait for acceptance.
    pub async fn read_abort(
        &self,
        address: u64,
        after_cycles: u32,
        timeout: Option<SimTime>,
    ) -> Result<()> {
        let _active = self.begin()?;
        let p = &self.pins;
        p.adr.set(address);
        p.we.set(0);
        p.cyc.set(1);
        p.stb.set(1);
        if let Err(e) = self.bounded(self.wait_accept(), timeout).await {
            self.drive_idle();
            return Err(e);
        }
        p.stb.set(0);
        clock_cycles(&p.clk, 1 + after_cycles).await;
        self.drive_idle();
        log::debug!("[wb] read at {:X} aborted", address);
        Ok(())
    }
}
