//! Read command implementation

use indicatif::{ProgressBar, ProgressStyle};
use norsim_core::Testbench;

use super::print_words;

/// Run the read command
pub fn run_read(
    bench: &Testbench,
    address: u32,
    count: usize,
    burst: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let burst = burst.max(1);

    let pb = ProgressBar::new(count as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} words")?
            .progress_chars("#>-"),
    );

    let progress = pb.clone();
    let words = bench.run(move |b| async move {
        let mut words = Vec::with_capacity(count);
        while words.len() < count {
            let n = burst.min(count - words.len());
            let addr = address + words.len() as u32;
            words.extend(b.read(addr, n).await?);
            progress.set_position(words.len() as u64);
        }
        Ok(words)
    })?;
    pb.finish_and_clear();

    print_words(address, &words);
    Ok(())
}
