//! Program command implementation

use norsim_core::Testbench;

use super::print_words;

/// Run the program command: optionally erase, program, read back
pub fn run_program(
    bench: &Testbench,
    address: u32,
    words: &[u16],
    erase: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = words.to_vec();
    let readback = bench.run(move |b| async move {
        if erase {
            println!("Erasing sector at {:#x}...", address);
            b.erase_sector(address).await?;
        }
        println!("Programming {} word(s) at {:#x}...", data.len(), address);
        b.program(address, &data).await?;

        let mut readback = Vec::with_capacity(data.len());
        for i in 0..data.len() as u32 {
            readback.extend(b.read(address + i, 1).await?);
        }
        Ok(readback)
    })?;

    print_words(address, &readback);

    // NOR programming can only clear bits
    let mismatches = words
        .iter()
        .zip(&readback)
        .filter(|(want, got)| want != got)
        .count();
    if mismatches > 0 {
        return Err(format!(
            "{} word(s) differ after programming (erase the sector first?)",
            mismatches
        )
        .into());
    }
    println!("Program complete");
    Ok(())
}
