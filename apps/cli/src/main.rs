//! docflow CLI: upload documents and manage the ingested library.
//!
//! Uploads run through the background ingestion pipeline; the CLI waits for
//! it to drain unless `--detach` is given, in which case `docflow resume`
//! finishes the work later.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
