use anyhow::Result;
use cashflow::cli::Cli;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cashflow::logging::init_tracing(cli.verbose);
    cli.run().await
}
