//! NOR flash model driven directly from the controller-side bus master

use norsim_core::nor::{
    CommandSequence, CommandState, MutationPolicy, NorBusMaster, NorBusTiming, NorFlash,
    NorGeometry, NorParams, NorTiming, Overlay, ReadWhileBusy,
};
use norsim_core::{Error, NorPins, Result};
use norsim_kernel::{ns, us, Sim, Simulator};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn params() -> NorParams {
    NorParams {
        geometry: NorGeometry {
            size: 0x1_0000,
            erase_size: 0x1000,
            write_buffer_words: 32,
        },
        timing: NorTiming::accelerated(),
        ..NorParams::default()
    }
}

fn attach(sim: &Sim, params: NorParams) -> (NorFlash, NorBusMaster) {
    let pins = NorPins::create(sim, "nor");
    let flash = NorFlash::new(sim, pins.clone(), params).unwrap();
    let bus = NorBusMaster::new(sim, pins, NorBusTiming::default(), &params.timing);
    (flash, bus)
}

#[test]
fn test_program_drives_ready_busy() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let (data, busy_seen, state) = simulator
        .run(async move {
            let (flash, bus) = attach(&sim, params());
            flash.start();

            bus.issue(&CommandSequence::Program {
                addr: 0x123,
                data: 0x5A5A,
            })
            .await;
            bus.wait_busy(us(1)).await?;
            let busy_seen = flash.is_busy();
            bus.wait_ready(us(5)).await?;
            let data = bus.read(0x123).await;
            Ok::<_, Error>((data, busy_seen, flash.state()))
        })
        .unwrap()
        .unwrap();
    assert_eq!(data, 0x5A5A);
    assert!(busy_seen);
    assert!(!state.busy);
    assert_eq!(state.command, CommandState::Cycle1);
}

#[test]
fn test_program_only_clears_bits() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let word = simulator
        .run(async move {
            let (flash, bus) = attach(&sim, params());
            flash.start();
            flash.preload(0x10, &[0xF0F0]).unwrap();

            bus.issue(&CommandSequence::Program {
                addr: 0x10,
                data: 0x0FFF,
            })
            .await;
            bus.wait_busy(us(1)).await?;
            bus.wait_ready(us(5)).await?;
            Ok::<_, Error>(bus.read(0x10).await)
        })
        .unwrap()
        .unwrap();
    assert_eq!(word, 0x00F0);
}

#[test]
fn test_mutation_on_ready() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let (during, after) = simulator
        .run(async move {
            let (flash, bus) = attach(
                &sim,
                NorParams {
                    mutation: MutationPolicy::OnReady,
                    ..params()
                },
            );
            flash.start();
            bus.issue(&CommandSequence::Program {
                addr: 0x40,
                data: 0x1234,
            })
            .await;
            bus.wait_busy(us(1)).await?;
            let during = flash.peek(0x40)?;
            bus.wait_ready(us(5)).await?;
            Ok::<_, Error>((during, flash.peek(0x40)?))
        })
        .unwrap()
        .unwrap();
    assert_eq!(during, 0xFFFF);
    assert_eq!(after, 0x1234);
}

#[test]
fn test_write_buffer_program() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let words = simulator
        .run(async move {
            let (flash, bus) = attach(&sim, params());
            flash.start();
            bus.issue(&CommandSequence::WriteBuffer {
                addr: 0x200,
                data: vec![1, 2, 3, 4, 5],
            })
            .await;
            bus.wait_busy(us(1)).await?;
            bus.wait_ready(us(10)).await?;
            Ok::<_, Error>(bus.read_page(0x200, 5).await)
        })
        .unwrap()
        .unwrap();
    assert_eq!(words, vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_sector_erase() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let (inside, outside) = simulator
        .run(async move {
            let (flash, bus) = attach(&sim, params());
            flash.start();
            flash.preload(0x1000, &[0x1111, 0x2222])?;
            flash.preload(0x2000, &[0x3333])?;

            bus.issue(&CommandSequence::SectorErase { addr: 0x1801 }).await;
            bus.wait_busy(us(1)).await?;
            bus.wait_ready(us(30)).await?;
            let inside = bus.read_page(0x1000, 2).await;
            let outside = bus.read(0x2000).await;
            Ok::<_, Error>((inside, outside))
        })
        .unwrap()
        .unwrap();
    assert_eq!(inside, vec![0xFFFF, 0xFFFF]);
    assert_eq!(outside, 0x3333);
}

#[test]
fn test_chip_erase() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let words = simulator
        .run(async move {
            let (flash, bus) = attach(&sim, params());
            flash.start();
            flash.preload(0, &[0])?;
            flash.preload(0xFFFF, &[0])?;

            bus.issue(&CommandSequence::ChipErase).await;
            bus.wait_busy(us(1)).await?;
            bus.wait_ready(us(60)).await?;
            Ok::<_, Error>(vec![bus.read(0).await, bus.read(0xFFFF).await])
        })
        .unwrap()
        .unwrap();
    assert_eq!(words, vec![0xFFFF, 0xFFFF]);
}

#[test]
fn test_cfi_query_and_reset() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let (qry, overlay, array) = simulator
        .run(async move {
            let (flash, bus) = attach(&sim, params());
            flash.start();
            flash.preload(0x10, &[0xBEEF])?;

            bus.issue(&CommandSequence::CfiEnter).await;
            let qry = bus.read_page(0x10, 3).await;
            let overlay = flash.state().overlay;
            bus.issue(&CommandSequence::Reset).await;
            let array = bus.read(0x10).await;
            Ok::<_, Error>((qry, overlay, array))
        })
        .unwrap()
        .unwrap();
    assert_eq!(qry, vec![u16::from(b'Q'), u16::from(b'R'), u16::from(b'Y')]);
    assert_eq!(overlay, Overlay::Cfi);
    assert_eq!(array, 0xBEEF);
}

#[test]
fn test_page_read_crosses_page() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let words = simulator
        .run(async move {
            let (flash, bus) = attach(&sim, params());
            flash.start();
            let data: Vec<u16> = (0..12).map(|i| 0x100 + i).collect();
            flash.preload(0x4, &data)?;
            Ok::<_, Error>(bus.read_page(0x4, 12).await)
        })
        .unwrap()
        .unwrap();
    assert_eq!(words, (0..12).map(|i| 0x100 + i).collect::<Vec<u16>>());
}

#[test]
fn test_read_while_busy_fails() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let result = simulator
        .run(async move {
            let (flash, bus) = attach(&sim, params());
            let handle = flash.start();
            bus.issue(&CommandSequence::Program { addr: 0, data: 0 }).await;
            bus.read(0).await;
            handle.join().await
        })
        .unwrap();
    assert!(matches!(result, Some(Err(Error::Unimplemented(_)))));
}

#[test]
fn test_read_while_busy_array_data() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let (word, busy) = simulator
        .run(async move {
            let (flash, bus) = attach(
                &sim,
                NorParams {
                    read_while_busy: ReadWhileBusy::ArrayData,
                    ..params()
                },
            );
            flash.start();
            bus.issue(&CommandSequence::Program {
                addr: 8,
                data: 0x00AA,
            })
            .await;
            let word = bus.read(8).await;
            (word, flash.is_busy())
        })
        .unwrap();
    assert_eq!(word, 0x00AA);
    assert!(busy);
}

#[test]
fn test_read_with_data_bus_driven_is_violation() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let result: Option<Result<_>> = simulator
        .run(async move {
            let (flash, bus) = attach(&sim, params());
            let handle = flash.start();
            let p = bus.pins();
            p.doe.set(1);
            p.ce.set(0);
            p.oe.set(0);
            sim.timer(ns(500)).await;
            handle.join().await
        })
        .unwrap();
    match result {
        Some(Err(e)) => assert!(e.is_violation()),
        other => panic!("unexpected {:?}", other.map(|r| r.is_ok())),
    }
}

#[test]
fn test_reset_clears_busy() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let (before, after, ry) = simulator
        .run(async move {
            let (flash, bus) = attach(&sim, params());
            flash.start();
            bus.issue(&CommandSequence::SectorErase { addr: 0 }).await;
            bus.wait_busy(us(1)).await?;
            let before = flash.state();
            flash.reset();
            sim.timer(us(30)).await;
            Ok::<_, Error>((before, flash.state(), bus.pins().ry.value()))
        })
        .unwrap()
        .unwrap();
    assert!(before.busy);
    assert!(before.busy_until.is_some());
    assert!(!after.busy);
    assert_eq!(after.busy_until, None);
    assert_eq!(ry, 1);
}

#[test]
fn test_preload_past_end_is_range_error() {
    init_logger();
    let simulator = Simulator::new();
    let sim = simulator.handle();
    let (tail, wrap, last) = simulator
        .run(async move {
            let (flash, _bus) = attach(&sim, params());
            let tail = flash.preload(0xFFFF, &[1, 2]);
            let wrap = flash.preload(u32::MAX, &[1, 2]);
            (tail, wrap, flash.peek(0xFFFF))
        })
        .unwrap();
    assert!(matches!(tail, Err(Error::Range { addr: 0x1_0000, .. })));
    assert!(matches!(wrap, Err(Error::Range { .. })));
    assert_eq!(last.unwrap(), 1);
}
