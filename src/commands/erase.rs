//! Erase command implementation

use norsim_core::Testbench;

/// Run the erase command on a sector or, with `chip`, the whole array
pub fn run_erase(
    bench: &Testbench,
    address: Option<u32>,
    chip: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let erase_size = bench.config().nor.geometry.erase_size;

    let first = bench.run(move |b| async move {
        let sector = match address {
            Some(addr) if !chip => {
                let sector = addr - addr % erase_size;
                println!("Erasing sector {:#x}..{:#x}", sector, sector + erase_size - 1);
                b.erase_sector(addr).await?;
                sector
            }
            _ => {
                println!("Erasing chip");
                b.erase_chip().await?;
                0
            }
        };
        b.read(sector, 1).await
    })?;

    if first.first() != Some(&0xFFFF) {
        return Err(format!("erase check failed: read {:04X?}", first).into());
    }
    println!("Erase complete");
    Ok(())
}
