use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use tracing_subscriber::EnvFilter;

mod args;
mod config;
mod context;
mod dashboard;
mod env;
mod fetch;
mod http;
mod query;
mod record;
mod store;
mod top;
mod tune;
mod ui;
mod utils;

use crate::args::CLIArgs;

const DEFAULT_VERSION: &str = env!("CARGO_PKG_VERSION");
const CLI_VERSION: &str = match option_env!("SQLTUNE_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_VERSION,
};

#[derive(Debug, Parser)]
#[command(
    name = "sqltune",
    about = "Elapse-time monitoring and SQL tuning console",
    version = CLI_VERSION
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive elapse-time dashboard
    Dashboard(CLIArgs<dashboard::DashboardArgs>),
    /// Print windowed averages and the slowest queries
    Top(CLIArgs<top::TopArgs>),
    /// Fetch JSON logs from a URL into blob storage
    Fetch(CLIArgs<fetch::FetchArgs>),
    /// Ask the completion service how to tune a query
    Tune(CLIArgs<tune::TuneArgs>),
    /// Manage the config file
    Config(CLIArgs<config::ConfigArgs>),
}

/// Diagnostics go to stderr, filtered by `SQLTUNE_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("SQLTUNE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    env::bootstrap_from_args(&argv)?;
    let cli = Cli::parse_from(argv);

    // The dashboard owns the terminal; its diagnostics go to the status line.
    if !matches!(cli.command, Commands::Dashboard(_)) {
        init_tracing();
    }

    match cli.command {
        Commands::Dashboard(cmd) => dashboard::run(cmd.base, cmd.args).await?,
        Commands::Top(cmd) => top::run(cmd.base, cmd.args).await?,
        Commands::Fetch(cmd) => fetch::run(cmd.base, cmd.args).await?,
        Commands::Tune(cmd) => tune::run(cmd.base, cmd.args).await?,
        Commands::Config(cmd) => config::run(cmd.base, cmd.args)?,
    }

    Ok(())
}
