//! DeliveryKit CLI: inspect the content delivery pipeline of a profile.
//!
//! Loads resource descriptor files, builds the pipeline for a profile set,
//! and reports the resolved strategy, descriptor table and handlers.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli)
}
