//! CFI dump command implementation

use norsim_core::Testbench;

use super::print_words;

/// Run the cfi command
pub fn run_cfi(bench: &Testbench, count: usize) -> Result<(), Box<dyn std::error::Error>> {
    let words = bench.run(move |b| async move { b.read_cfi(count).await })?;

    let qry: String = words
        .iter()
        .take(3)
        .map(|&w| char::from(w as u8))
        .collect();
    if qry != "QRY" {
        log::warn!("CFI signature missing, got {:?}", qry);
    }
    print_words(0x10, &words);

    // Device size is 2^n bytes at offset 0x27
    if let Some(&n) = words.get(0x17) {
        println!("Device size: {} bytes", 1u64 << n.min(63));
    }
    Ok(())
}
