mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    match args.command {
        Command::Assemble { source, output } => {
            commands::assemble(&source, output.as_deref())?;
        }
        Command::Inspect { unit } => print!("{}", commands::inspect(&unit)?),
        Command::Rules { config } => commands::rules(&config)?,
        Command::Run {
            config,
            units,
            entry,
            watch,
        } => commands::run(&config, &units, &entry, watch).await?,
    }
    Ok(())
}
