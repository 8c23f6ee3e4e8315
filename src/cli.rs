//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a string as a hex or decimal 16-bit word
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let v = parse_hex_u32(s)?;
    u16::try_from(v).map_err(|_| format!("Value {:#x} does not fit in 16 bits", v))
}

#[derive(Parser)]
#[command(name = "norsim")]
#[command(author, version, about = "NOR flash, QSPI and Wishbone bus simulator", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Simulation configuration (TOML format)
    /// Without it, datasheet bus timing with shortened program/erase times is used
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// QSPI clock frequency in MHz (overrides the configuration)
    #[arg(long, global = true)]
    pub freq: Option<f64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read words over QSPI fast read
    Read {
        /// Word address (hex with 0x prefix, or decimal)
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Number of words
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Words per QSPI frame
        #[arg(long, default_value_t = 1)]
        burst: usize,
    },

    /// Program words over QSPI, then read them back
    Program {
        /// First word address
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Words to program (hex with 0x prefix, or decimal)
        #[arg(value_parser = parse_hex_u16, num_args = 1.., required = true)]
        words: Vec<u16>,

        /// Erase the containing sector first
        #[arg(long)]
        erase: bool,
    },

    /// Erase a sector, or the whole chip
    Erase {
        /// Any word address inside the sector
        #[arg(value_parser = parse_hex_u32, required_unless_present = "chip")]
        address: Option<u32>,

        /// Erase the whole chip instead
        #[arg(long, conflicts_with = "address")]
        chip: bool,
    },

    /// Dump the CFI identification table
    Cfi {
        /// Number of words from offset 0x10
        #[arg(short = 'n', long, default_value_t = 0x20)]
        count: usize,
    },

    /// Fast-read one word across a range of QSPI clock frequencies
    Sweep {
        /// Lowest frequency in MHz
        #[arg(long, default_value_t = 1.0)]
        start: f64,

        /// Highest frequency in MHz
        #[arg(long, default_value_t = 20.0)]
        stop: f64,

        /// Number of steps between start and stop
        #[arg(long, default_value_t = 32)]
        steps: u32,

        /// Word address to read
        #[arg(long, value_parser = parse_hex_u32, default_value = "0x83")]
        address: u32,

        /// Word preloaded at the address
        #[arg(long, value_parser = parse_hex_u16, default_value = "0x3456")]
        data: u16,
    },
}
