//! Pipelined Wishbone initiator against the responder stubs

use norsim_core::nor::{NorBusMaster, NorBusTiming, NorController, NorFlash, NorParams, NorTiming};
use norsim_core::wishbone::{MonitorLog, StubOptions, WishboneMaster, WishboneResponder};
use norsim_core::{Error, NorPins, WishbonePins};
use norsim_kernel::{clock_cycles, ns, us, Clock, Sim, Simulator};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn rig(sim: &Sim) -> (WishboneMaster, WishboneResponder) {
    let pins = WishbonePins::create(sim, "wb");
    Clock::new(pins.clk.clone(), 13_330).start(sim);
    (
        WishboneMaster::new(sim, pins.clone()),
        WishboneResponder::new(sim, pins),
    )
}

#[test]
fn test_single_read_and_write() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let (data, latency) = simulator
        .run(async move {
            let (master, stub) = rig(&sim);
            let expect = sim.spawn(async move {
                stub.expect_read(0x83, 0x3456, StubOptions::stall(3)).await?;
                stub.expect_write(0x84, 0xBEEF, StubOptions::default()).await
            });
            let txn = master.transaction(0x83, None, Some(us(1))).await?;
            master.write(0x84, 0xBEEF, Some(us(1))).await?;
            expect.join().await.unwrap()?;
            Ok::<_, Error>((txn.rdata, txn.ack_latency))
        })
        .unwrap()
        .unwrap();
    assert_eq!(data, Some(0x3456));
    assert_eq!(latency, 4);
}

#[test]
fn test_multi_read_with_stall() {
    init_logger();
    let addresses = [1u64, 2, 100, 1351, 38510];
    let pairs: Vec<(u64, u64)> = addresses
        .iter()
        .map(|&a| (a, (a * 7 + 3) & 0xFFFF))
        .collect();

    for stall in [0, 1, 4] {
        let simulator = Simulator::new();
        let sim = simulator.handle();
        let expected = pairs.clone();
        let got = simulator
            .run(async move {
                let (master, stub) = rig(&sim);
                let script = expected.clone();
                let expect = sim.spawn(async move {
                    stub.expect_read_sequence(&script, StubOptions::stall(stall))
                        .await
                });
                let got = master.multi_read(&addresses, Some(us(2))).await?;
                expect.join().await.unwrap()?;
                Ok::<_, Error>(got)
            })
            .unwrap()
            .unwrap();
        assert_eq!(got, pairs, "stall {}", stall);
    }
}

#[test]
fn test_read_abort_drops_response() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let log = MonitorLog::new();
    let record = log.clone();
    let data = simulator
        .run(async move {
            let (master, stub) = rig(&sim);
            sim.spawn(async move { stub.monitor(|_| 0x7010, 5, record).await });
            master.read_abort(0x20, 1, Some(us(1))).await?;
            clock_cycles(&master.pins().clk, 8).await;
            assert!(master.pins().ack.is_low());
            master.read(0x21, Some(us(1))).await
        })
        .unwrap()
        .unwrap();
    assert_eq!(data, 0x7010);
    let addresses: Vec<u64> = log.entries().iter().map(|t| t.address).collect();
    assert_eq!(addresses, vec![0x20, 0x21]);
    assert_eq!(log.entries()[1].ack_latency, 6);
}

#[test]
fn test_abort_then_read_same_address_through_controller() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let reads = simulator
        .run(async move {
            let (master, _stub) = rig(&sim);
            let nor = NorPins::create(&sim, "nor");
            let params = NorParams {
                timing: NorTiming::accelerated(),
                ..NorParams::default()
            };
            let flash = NorFlash::new(&sim, nor.clone(), params)?;
            flash.preload(0x20, &[0x1234])?;
            flash.start();
            let bus = NorBusMaster::new(&sim, nor, NorBusTiming::default(), &params.timing);
            NorController::new(&sim, master.pins().clone(), bus).start();

            let mut reads = Vec::new();
            for after in 0..=20 {
                master.read_abort(0x20, after, Some(us(1))).await?;
                clock_cycles(&master.pins().clk, 2).await;
                reads.push(master.read(0x20, Some(us(2))).await?);
            }
            Ok::<_, Error>(reads)
        })
        .unwrap()
        .unwrap();
    assert_eq!(reads, vec![0x1234; 21]);
}

#[test]
fn test_second_initiator_on_open_cycle() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let (cyc, second, first) = simulator
        .run(async move {
            let (master, _stub) = rig(&sim);
            let pins = master.pins().clone();
            let first = sim.spawn(async move { master.read(0x10, Some(ns(500))).await });
            sim.timer(ns(30)).await;

            let other = WishboneMaster::new(&sim, pins.clone());
            sim.settle().await;
            let cyc = pins.cyc.value();
            let second = other.read(0x11, Some(ns(200))).await;
            (cyc, second, first.join().await)
        })
        .unwrap();
    assert_eq!(cyc, 1);
    assert!(matches!(second, Err(Error::TransactionInProgress(_))));
    match first {
        Some(Err(e)) => assert!(e.is_timeout()),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_second_request_while_active() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let (second, first) = simulator
        .run(async move {
            let (master, _stub) = rig(&sim);
            let other = master.clone();
            let first = sim.spawn(async move { other.read(0x10, Some(ns(500))).await });
            sim.timer(ns(30)).await;
            let active = master.is_active();
            assert!(active);
            let second = master.read(0x11, None).await;
            (second, first.join().await)
        })
        .unwrap();
    assert!(matches!(second, Err(Error::TransactionInProgress(_))));
    match first {
        Some(Err(e)) => assert!(e.is_timeout()),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_timeout_returns_bus_to_idle() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let (result, cyc, active) = simulator
        .run(async move {
            let (master, _stub) = rig(&sim);
            let result = master.read(0x10, Some(ns(200))).await;
            sim.timer(ns(20)).await;
            (result, master.pins().cyc.value(), master.is_active())
        })
        .unwrap();
    assert!(result.unwrap_err().is_timeout());
    assert_eq!(cyc, 0);
    assert!(!active);
}

#[test]
fn test_expect_nothing_fails_on_strobe() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let result = simulator
        .run(async move {
            let (master, stub) = rig(&sim);
            let guard = sim.spawn(async move { stub.expect_nothing().await });
            let _ = master.read(0x99, Some(ns(200))).await;
            guard.join().await
        })
        .unwrap();
    match result {
        Some(Err(e)) => assert!(e.is_violation()),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_expect_nothing_quiet_bus() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let finished = simulator
        .run(async move {
            let (_master, stub) = rig(&sim);
            let guard = sim.spawn(async move { stub.expect_nothing().await });
            sim.timer(us(1)).await;
            guard.is_finished()
        })
        .unwrap();
    assert!(!finished);
}

#[test]
fn test_write_data_mismatch() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let result = simulator
        .run(async move {
            let (master, stub) = rig(&sim);
            let expect = sim.spawn(async move {
                stub.expect_write(0x10, 0x1234, StubOptions::default()).await
            });
            let _ = master.transaction(0x10, Some(0x4321), Some(ns(300))).await;
            expect.join().await
        })
        .unwrap();
    match result {
        Some(Err(e)) => assert!(e.is_violation()),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_stub_timeout() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let result = simulator
        .run(async move {
            let (_master, stub) = rig(&sim);
            stub.expect_read(0, 0, StubOptions::stall(0).with_timeout(ns(500)))
                .await
        })
        .unwrap();
    assert!(result.unwrap_err().is_timeout());
}
