// src/bin/atd.rs

use atd::cli::{self, Cli};
use clap::Parser;
use colored::*;
use std::io;

/// Sets up logging, runs the requested command and turns any error into a
/// message on stderr and exit code 1.
fn main() {
    env_logger::init();

    let stdout = io::stdout();
    if let Err(e) = cli::run(Cli::parse(), &mut stdout.lock()) {
        eprintln!("\n{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}
