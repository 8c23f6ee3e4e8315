//! Man page generator for norsim
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]
//!
//! Writes `norsim.1` plus one `norsim-<command>.1` per subcommand.

use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

fn render(cmd: clap::Command, path: &Path) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd).render(&mut buffer)?;
    fs::write(path, buffer)?;
    println!("Man page generated at: {}", path.display());
    Ok(())
}

fn main() -> std::io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));
    fs::create_dir_all(&output_dir)?;

    let cmd = cli::Cli::command();
    for sub in cmd.get_subcommands() {
        let path = output_dir.join(format!("norsim-{}.1", sub.get_name()));
        render(sub.clone(), &path)?;
    }
    render(cmd, &output_dir.join("norsim.1"))?;

    println!("\nTo view the man page:");
    println!("  man -l {}", output_dir.join("norsim.1").display());
    Ok(())
}
