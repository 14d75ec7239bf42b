//! CLI argument parsing with clap derive

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use devmachine_common::DesiredState;

use crate::app::{AppContext, AppFlags, OutputFlags};
use crate::commands;

/// Per-tenant remote development machines
#[derive(Parser)]
#[command(
    name = "devmachine",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(
        long,
        global = true,
        env = "NO_COLOR",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub no_color: bool,

    /// Configuration file (default: ~/.devmachine/config.yaml)
    #[arg(long, global = true, env = "DEVMACHINE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register a machine and queue its provisioning
    Create(commands::create::CreateArgs),

    /// Stop a running machine (preserves its disk)
    Suspend(commands::power::PowerArgs),

    /// Start a suspended machine
    Resume(commands::power::PowerArgs),

    /// Release all resources of a machine
    Delete(commands::delete::DeleteArgs),

    /// Show one machine
    Status(commands::status::StatusArgs),

    /// List all machines
    List,

    /// Process queued provisioning tasks
    Worker(commands::worker::WorkerArgs),

    /// Show version
    Version,
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<()> {
        let Cli {
            json,
            quiet,
            no_color,
            config,
            command,
        } = self;

        if let Command::Version = command {
            commands::version::run(json);
            return Ok(());
        }

        let yes = matches!(&command, Command::Delete(args) if args.yes);
        let app = AppContext::new(&AppFlags {
            output: OutputFlags {
                no_color,
                quiet,
                json,
            },
            yes,
            config,
        })?;

        match command {
            Command::Create(args) => commands::create::run(&app, &args).await,
            Command::Suspend(args) => {
                commands::power::run(&app, &args, DesiredState::Suspended).await
            }
            Command::Resume(args) => commands::power::run(&app, &args, DesiredState::Running).await,
            Command::Delete(args) => commands::delete::run(&app, &args).await,
            Command::Status(args) => commands::status::run(&app, &args).await,
            Command::List => commands::status::list(&app).await,
            Command::Worker(args) => commands::worker::run(&app, &args).await,
            Command::Version => Ok(()),
        }
    }
}
