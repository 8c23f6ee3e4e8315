//! norsim - NOR flash bus simulator
//!
//! Runs scenarios against a pin-level model of a parallel NOR flash reached
//! through the full bus stack:
//!
//! ```text
//! QSPI host -> QSPI target -> Wishbone -> NOR controller -> NOR flash
//! ```
//!
//! Every command builds a fresh simulation, runs to completion and prints
//! what the host observed. Nothing touches real hardware.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use norsim_core::{SimConfig, Testbench};
use std::path::Path;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let config = load_config(cli.config.as_deref(), cli.freq)?;
    let bench = Testbench::new(config)?;

    let result = match cli.command {
        Commands::Read {
            address,
            count,
            burst,
        } => commands::read::run_read(&bench, address, count, burst),
        Commands::Program {
            address,
            words,
            erase,
        } => commands::program::run_program(&bench, address, &words, erase),
        Commands::Erase { address, chip } => commands::erase::run_erase(&bench, address, chip),
        Commands::Cfi { count } => commands::cfi::run_cfi(&bench, count),
        Commands::Sweep {
            start,
            stop,
            steps,
            address,
            data,
        } => commands::sweep::run_sweep(&bench, start, stop, steps, address, data),
    };

    log::info!("simulated {}", norsim_kernel::time::Pretty(bench.now()));
    result
}

/// Configuration from a file, or the accelerated defaults
fn load_config(
    path: Option<&Path>,
    freq: Option<f64>,
) -> Result<SimConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::accelerated(),
    };
    if let Some(freq) = freq {
        config.qspi.freq_mhz = freq;
        config.validate()?;
    }
    log::debug!("configuration: {:?}", config);
    Ok(config)
}
