use anyhow::Result;
use clap::Parser;
use scribed::{
    app,
    cli::{handle_reprocess_command, handle_sweep_command, Cli, CliCommand},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("scribed {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(CliCommand::Reprocess(args)) => {
            handle_reprocess_command(args).await?;
            return Ok(());
        }
        Some(CliCommand::Sweep) => {
            handle_sweep_command().await?;
            return Ok(());
        }
        Some(CliCommand::Worker) | None => {}
    }

    app::run_service().await
}
