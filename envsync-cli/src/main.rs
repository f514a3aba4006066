//! envsync: keeps a remote service's environment records in step with the
//! GitOps applications running in a cluster.
//!
//! # Usage
//!
//! ```text
//! envsync init [--force] [--remote-url <url>] [--source-type <type>]
//! envsync run
//! envsync status [--json]
//! envsync stop
//! envsync reconcile
//! envsync environments [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{environments::EnvironmentsArgs, init::InitArgs, status::StatusArgs};

#[derive(Parser, Debug)]
#[command(
    name = "envsync",
    version,
    about = "Reconcile GitOps environments with a remote service",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default agent config to ~/.envsync/config.yaml.
    Init(InitArgs),

    /// Run the agent in the foreground until SIGINT/SIGTERM or `envsync stop`.
    Run,

    /// Show agent status over the control socket.
    Status(StatusArgs),

    /// Ask a running agent to shut down.
    Stop,

    /// Ask a running agent for an immediate reconciliation tick.
    Reconcile,

    /// List remote environments of the managed source type.
    Environments(EnvironmentsArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Run => commands::agent::run(),
        Commands::Status(args) => args.run(),
        Commands::Stop => commands::agent::stop(),
        Commands::Reconcile => commands::agent::reconcile(),
        Commands::Environments(args) => args.run(),
    }
}
