use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use adaptive_logging::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let command = args.get_command();

    // The server installs its own subscriber with the escalation layers
    if !matches!(command, cli::Commands::Start) {
        init_tracing();
    }

    match command {
        cli::Commands::Start => {
            commands::start::execute(args.config).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args.config)?,
        },
        cli::Commands::Version => {
            println!("adaptive-logging v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
