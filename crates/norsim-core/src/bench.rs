//! Full-stack testbench
//!
//! QSPI host → QSPI target → Wishbone → NOR controller → NOR pins → NOR
//! model, with the Wishbone clock free-running. A scenario gets a [`Bench`]
//! with handles to every piece. If a background model fails first, its
//! error becomes the scenario's result.

use std::future::Future;
use std::pin::pin;

use futures::future::{select, Either};
use norsim_kernel::{clock_cycles, with_timeout, Clock, Sim, SimTime, Simulator};

use crate::bus::{NorPins, QspiPins, WishbonePins};
use crate::config::SimConfig;
use crate::error::{Error, Result};
use crate::nor::array::word_addr;
use crate::nor::{CommandSequence, NorBusMaster, NorController, NorFlash};
use crate::qspi::{QspiHost, QspiTarget};
use crate::wishbone::WishboneMaster;

/// Handles a scenario works with
#[derive(Clone)]
pub struct Bench {
    /// Scheduler handle
    pub sim: Sim,
    /// Drives QSPI frames
    pub host: QspiHost,
    /// QSPI to Wishbone bridge
    pub target: QspiTarget,
    /// Wishbone pins between target and controller
    pub wb: WishbonePins,
    /// Controller side of the NOR pins
    pub nor_bus: NorBusMaster,
    /// The flash model
    pub flash: NorFlash,
    /// Configuration the bench was built from
    pub config: SimConfig,
}

impl Bench {
    fn build(sim: &Sim, config: SimConfig) -> Result<Self> {
        let qspi = QspiPins::create(sim, "qspi", config.qspi.sce_active_high);
        let wb = WishbonePins::create(sim, "wb");
        let nor = NorPins::create(sim, "nor");

        let flash = NorFlash::new(sim, nor.clone(), config.nor)?;
        let nor_bus = NorBusMaster::new(sim, nor, config.nor_bus, &config.nor.timing);
        let host = QspiHost::new(sim, qspi.clone(), config.qspi)?;
        let target = QspiTarget::new(
            sim,
            qspi,
            WishboneMaster::new(sim, wb.clone()),
            config.qspi_target(),
        );
        Ok(Self {
            sim: sim.clone(),
            host,
            target,
            wb,
            nor_bus,
            flash,
            config,
        })
    }

    /// Wait until queued QSPI writes reached the flash and the flash is no
    /// longer busy
    pub async fn wait_idle(&self, timeout: SimTime) -> Result<()> {
        let ry = self.flash.pins().ry.clone();
        with_timeout(
            &self.sim,
            async {
                self.target.wait_writes_idle().await;
                while self.flash.is_busy() {
                    ry.rising_edge().await;
                }
            },
            timeout,
            "flash ready",
        )
        .await?;
        Ok(())
    }

    /// Upper bound for any single operation to finish
    pub fn op_timeout(&self) -> SimTime {
        let t = &self.config.nor.timing;
        let longest = t
            .busy_program
            .max(t.busy_buffer_program)
            .max(t.busy_erase_sector)
            .max(t.busy_erase_chip);
        2 * (longest + t.t_busy) + self.host.period() * 1000
    }

    /// Burst read over QSPI
    pub async fn read(&self, addr: u32, count: usize) -> Result<Vec<u16>> {
        self.host.read_fast(addr, count).await
    }

    /// Program words over QSPI, one program frame per word. The flash
    /// ignores writes while busy, so every word waits for ready.
    pub async fn program(&self, addr: u32, words: &[u16]) -> Result<()> {
        let size = self.config.nor.geometry.size;
        for (i, word) in words.iter().enumerate() {
            self.host.prog_word(word_addr(addr, i, size)?, *word).await?;
            self.wait_idle(self.op_timeout()).await?;
        }
        Ok(())
    }

    /// Erase the sector containing `addr` over QSPI and wait
    pub async fn erase_sector(&self, addr: u32) -> Result<()> {
        self.host.erase_sector(addr).await?;
        self.wait_idle(self.op_timeout()).await
    }

    /// Erase the whole chip over QSPI and wait
    pub async fn erase_chip(&self) -> Result<()> {
        self.host.erase_chip().await?;
        self.wait_idle(self.op_timeout()).await
    }

    /// Read `count` CFI words from offset 0x10 over QSPI, then return to
    /// array reads
    pub async fn read_cfi(&self, count: usize) -> Result<Vec<u16>> {
        for (addr, data) in CommandSequence::CfiEnter.cycles() {
            self.host.write_through(addr, data).await?;
        }
        self.target.wait_writes_idle().await;
        let mut words = Vec::with_capacity(count);
        for i in 0..count as u32 {
            words.extend(self.host.read_fast(0x10 + i, 1).await?);
        }
        self.host.reset().await?;
        self.target.wait_writes_idle().await;
        Ok(words)
    }
}

/// Owns a scheduler and runs scenarios on a freshly built stack
pub struct Testbench {
    simulator: Simulator,
    config: SimConfig,
}

impl Testbench {
    /// Validate `config` and create the scheduler
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let simulator = Simulator::new();
        simulator.set_time_limit(config.sim.time_limit);
        Ok(Self { simulator, config })
    }

    /// Configuration in use
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Current simulated time
    pub fn now(&self) -> SimTime {
        self.simulator.now()
    }

    /// Build the stack, hold Wishbone reset for the configured cycles, run
    /// `scenario`, then kill every background task
    pub fn run<F, Fut, T>(&self, scenario: F) -> Result<T>
    where
        F: FnOnce(Bench) -> Fut,
        Fut: Future<Output = Result<T>> + 'static,
        T: 'static,
    {
        let sim = self.simulator.handle();
        let bench = Bench::build(&sim, self.config)?;
        let main = scenario(bench.clone());

        let outcome = self.simulator.run(async move {
            let clock = Clock::new(bench.wb.clk.clone(), bench.config.wishbone.clk_period())
                .start(&sim);
            let flash = bench.flash.start();
            let controller =
                NorController::new(&sim, bench.wb.clone(), bench.nor_bus.clone()).start();
            let target = bench.target.start();

            bench.wb.rst.set(1);
            clock_cycles(&bench.wb.clk, bench.config.wishbone.reset_cycles).await;
            bench.wb.rst.set(0);
            log::debug!("[bench] reset released at {}", norsim_kernel::time::Pretty(sim.now()));

            let result = {
                let failure = async {
                    match select(pin!(flash.join()), pin!(target.join())).await {
                        Either::Left((out, _)) => (out, "flash"),
                        Either::Right((out, _)) => (out, "qspi target"),
                    }
                };
                match select(pin!(main), pin!(failure)).await {
                    Either::Left((result, _)) => result,
                    Either::Right(((out, name), _)) => {
                        log::debug!("[bench] {} stopped during the scenario", name);
                        match out {
                            Some(Err(e)) => Err(e),
                            Some(Ok(never)) => match never {},
                            None => Err(Error::TaskKilled(name)),
                        }
                    }
                }
            };

            target.kill();
            controller.kill();
            flash.kill();
            bench.flash.reset();
            clock.kill();
            result
        })?;
        outcome
    }
}
