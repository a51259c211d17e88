mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting RunLens - CI run signal engine");
    cli.execute()?;

    Ok(())
}
