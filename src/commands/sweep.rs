//! Clock frequency sweep

use indicatif::{ProgressBar, ProgressStyle};
use norsim_core::Testbench;

/// Frequencies from `start` to `stop` in `steps` equal increments
fn frequencies(start: f64, stop: f64, steps: u32) -> Vec<f64> {
    let steps = steps.max(1);
    (0..=steps)
        .map(|i| start + f64::from(i) * (stop - start) / f64::from(steps))
        .collect()
}

/// Run the sweep command: one fast read per frequency, all must match
pub fn run_sweep(
    bench: &Testbench,
    start: f64,
    stop: f64,
    steps: u32,
    address: u32,
    data: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let freqs = frequencies(start, stop, steps);

    let pb = ProgressBar::new(freqs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let progress = pb.clone();
    let results = bench.run(move |b| async move {
        b.flash.preload(address, &[data])?;
        let mut host = b.host.clone();
        let mut results = Vec::with_capacity(freqs.len());
        for f in freqs {
            host.set_frequency(f)?;
            progress.set_message(format!("{:.2} MHz", f));
            let word = host.read_fast(address, 1).await?;
            results.push((f, host.period(), word.first().copied()));
            progress.inc(1);
        }
        Ok(results)
    })?;
    pb.finish_and_clear();

    let mut failures = 0;
    for (f, period, word) in &results {
        let ok = *word == Some(data);
        if !ok {
            failures += 1;
        }
        println!(
            "{:>8.3} MHz  T={:>8} ps  read={}  {}",
            f,
            period,
            word.map_or("----".to_string(), |w| format!("{:04X}", w)),
            if ok { "ok" } else { "MISMATCH" }
        );
    }

    if failures > 0 {
        return Err(format!("{} of {} frequencies failed", failures, results.len()).into());
    }
    println!("All {} frequencies read {:04X}", results.len(), data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequencies() {
        let f = frequencies(1.0, 20.0, 32);
        assert_eq!(f.len(), 33);
        assert_eq!(f[0], 1.0);
        assert!((f[32] - 20.0).abs() < 1e-9);
    }
}
