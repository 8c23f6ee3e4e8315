//! Common waiting patterns built from triggers

use std::future::Future;

use futures::future::{select, Either};

use crate::error::Timeout;
use crate::kernel::Sim;
use crate::signal::Signal;
use crate::time::SimTime;

/// Wait for `n` rising edges of `clk`
pub async fn clock_cycles(clk: &Signal, n: u32) {
    for _ in 0..n {
        clk.rising_edge().await;
    }
}

/// Wait for `n` falling edges of `clk`
pub async fn falling_cycles(clk: &Signal, n: u32) {
    for _ in 0..n {
        clk.falling_edge().await;
    }
}

/// Run `fut` but give up after `timeout` of simulated time.
///
/// `awaited` names what was being waited for and ends up in the error.
pub async fn with_timeout<F>(
    sim: &Sim,
    fut: F,
    timeout: SimTime,
    awaited: &str,
) -> Result<F::Output, Timeout>
where
    F: Future,
{
    let fut = std::pin::pin!(fut);
    match select(fut, sim.timer(timeout)).await {
        Either::Left((value, _)) => Ok(value),
        Either::Right(((), _)) => {
            log::debug!("timeout waiting for {}", awaited);
            Err(Timeout {
                awaited: awaited.to_string(),
                after: timeout,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ns;
    use crate::{Clock, Simulator};

    #[test]
    fn test_clock_cycles() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let t = simulator
            .run(async move {
                let clk = sim.signal("clk", 1, 0);
                let handle = Clock::new(clk.clone(), ns(10)).start(&sim);
                clock_cycles(&clk, 1).await;
                let start = sim.now();
                clock_cycles(&clk, 4).await;
                falling_cycles(&clk, 1).await;
                handle.kill();
                sim.now() - start
            })
            .unwrap();
        assert_eq!(t, ns(45));
    }

    #[test]
    fn test_timeout_expires() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let err = simulator
            .run(async move {
                let ack = sim.signal("ack", 1, 0);
                with_timeout(&sim, ack.rising_edge(), ns(100), "ack").await
            })
            .unwrap()
            .unwrap_err();
        assert_eq!(err.awaited, "ack");
        assert_eq!(err.after, ns(100));
        assert!(err.to_string().contains("100 ns"));
    }

    #[test]
    fn test_timeout_not_hit() {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let r = simulator
            .run(async move { with_timeout(&sim, sim.timer(ns(5)), ns(100), "timer").await })
            .unwrap();
        assert!(r.is_ok());
    }
}
