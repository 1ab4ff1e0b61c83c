mod app;
mod cli;
mod commands;
mod error;
mod http;
mod smtp;

#[cfg(test)]
mod testutil;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::{Cli, Command};
use crate::error::AppError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Config(args) => commands::config_cmd(args, &cli.global),

        Command::Check => commands::check(&cli.global),

        Command::Run(args) => {
            let config = commands::load_config(&cli.global)?;
            tracing::debug!(cameras = config.cameras.len(), "starting daemon");
            App::build(&config, args.bind).await?.run().await
        }
    }
}
