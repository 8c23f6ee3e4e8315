//! Wishbone to NOR bridge
//!
//! A Wishbone responder that turns each accepted request into one NOR bus
//! cycle. `stall` is held while the NOR access runs; the result is acked
//! for one cycle, or dropped if the initiator gave up the cycle meanwhile.

use norsim_kernel::{JoinHandle, Sim};

use super::bus::NorBusMaster;
use crate::bus::WishbonePins;

/// Wishbone responder backed by a NOR bus master
#[derive(Debug, Clone)]
pub struct NorController {
    sim: Sim,
    wb: WishbonePins,
    nor: NorBusMaster,
}

impl NorController {
    /// Create a controller; nothing happens until [`NorController::start`]
    pub fn new(sim: &Sim, wb: WishbonePins, nor: NorBusMaster) -> Self {
        Self {
            sim: sim.clone(),
            wb,
            nor,
        }
    }

    /// The NOR side
    pub fn nor(&self) -> &NorBusMaster {
        &self.nor
    }

    /// Spawn the responder loop
    pub fn start(&self) -> JoinHandle<()> {
        let this = self.clone();
        self.sim.spawn(async move { this.run().await })
    }

    async fn run(self) {
        let w = &self.wb;
        w.stall.set(0);
        w.ack.set(0);
        loop {
            w.clk.rising_edge().await;
            if w.ack.is_high() {
                w.ack.set(0);
            }
            if w.rst.is_high() || w.cyc.is_low() {
                continue;
            }
            if w.stb.is_low() || w.stall.is_high() {
                continue;
            }

            let addr = w.adr.value() as u32;
            let write = w.we.is_high();
            let data = w.wdata.value() as u16;
            w.stall.set(1);

            let result = if write {
                log::debug!("[wb] nor write {:X} = {:04X}", addr, data);
                self.nor.write(addr, data).await;
                None
            } else {
                let v = self.nor.read(addr).await;
                log::debug!("[wb] nor read {:X} = {:04X}", addr, v);
                Some(v)
            };

            w.clk.rising_edge().await;
            if w.cyc.is_high() && w.rst.is_low() {
                if let Some(v) = result {
                    w.rdata.set(u64::from(v));
                }
                w.ack.set(1);
            } else {
                log::debug!("[wb] request at {:X} aborted, result dropped", addr);
            }
            w.stall.set(0);
        }
    }
}
