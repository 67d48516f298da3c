#![forbid(unsafe_code)]

//! ndh-telemetry - NeuroDataHub telemetry service CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        eprintln!("ndh-telemetry: {e}");
        std::process::exit(1);
    }
}
