//! bucket-invert CLI entrypoint

use anyhow::Result;
use clap::Parser;

use bucket_invert::cli::Cli;
use bucket_invert::diagnostics;

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init(diagnostics::DEFAULT_FILTER)?;

    // Parse and execute CLI
    let cli = Cli::parse();
    if let Err(e) = cli.execute().await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
