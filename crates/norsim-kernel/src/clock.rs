//! Free-running clock generator

use crate::kernel::Sim;
use crate::signal::Signal;
use crate::task::JoinHandle;
use crate::time::SimTime;

/// Toggles a signal with a fixed period, starting high
#[derive(Debug, Clone)]
pub struct Clock {
    signal: Signal,
    period: SimTime,
}

impl Clock {
    /// Create a clock for `signal`; nothing happens until [`Clock::start`]
    pub fn new(signal: Signal, period: SimTime) -> Self {
        Self {
            signal,
            period: period.max(2),
        }
    }

    /// Clock period
    pub fn period(&self) -> SimTime {
        self.period
    }

    /// High phase; the low phase takes the remainder of the period
    pub fn high_time(&self) -> SimTime {
        self.period / 2
    }

    /// Spawn the toggling task. Kill the returned handle to stop the clock.
    pub fn start(self, sim: &Sim) -> JoinHandle<()> {
        let high = self.high_time();
        let low = self.period - high;
        let timer = sim.clone();
        sim.spawn(async move {
            loop {
                self.signal.set(1);
                timer.timer(high).await;
                self.signal.set(0);
                timer.timer(low).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ns;
    use crate::Simulator;

    #[test]
    fn test_clock_edges() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let (rises, falls) = simulator
            .run(async move {
                let clk = sim.signal("clk", 1, 0);
                let handle = Clock::new(clk.clone(), ns(10)).start(&sim);
                let mut rises = Vec::new();
                let mut falls = Vec::new();
                for _ in 0..3 {
                    clk.rising_edge().await;
                    rises.push(sim.now());
                    clk.falling_edge().await;
                    falls.push(sim.now());
                }
                handle.kill();
                (rises, falls)
            })
            .unwrap();
        assert_eq!(rises, vec![0, ns(10), ns(20)]);
        assert_eq!(falls, vec![ns(5), ns(15), ns(25)]);
    }

    #[test]
    fn test_odd_period_split() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let clock = Clock::new(sim.signal("clk", 1, 0), 13_330);
        assert_eq!(clock.high_time(), 6_665);
        assert_eq!(clock.period(), 13_330);
    }
}
