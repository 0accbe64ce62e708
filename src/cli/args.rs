use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "scribed")]
#[command(about = "Meeting archive transcription worker", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the worker service (pipeline workers + retry sweeper)
    Worker,
    /// Re-run the pipeline for stored archives
    Reprocess(ReprocessCliArgs),
    /// Run a single retry sweep pass
    Sweep,
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct ReprocessCliArgs {
    /// Archive keys to reprocess
    pub keys: Vec<String>,
    /// Reprocess every archive created by this user
    #[arg(long, conflicts_with = "all")]
    pub user: Option<String>,
    /// Reprocess every known archive
    #[arg(long)]
    pub all: bool,
}
