mod cli;
mod config;
mod engine;
mod error;
mod logging;
mod model;
mod orchestrator;
mod render;
mod storage;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_non_tui = args.command.is_some();

    cli::run(args).await?;
    // Explicitly exit on success in non-TUI modes so lingering blocking tasks cannot hold the process.
    if is_non_tui {
        std::process::exit(0);
    }
    Ok(())
}
