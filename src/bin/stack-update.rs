//! stack-update CLI - update images, host packages, and filter lists

use clap::{Parser, Subcommand};
use stackhold::pipeline::{UpdateCommand, UpdateOptions, UpdatePipeline};
use stackhold::{report, ComposeController, Config, Notifier, ResticStore, Result};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "stack-update")]
#[command(about = "Update the service stack or roll it back", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Recreate services even when no image digest changed
    #[arg(long, global = true)]
    force: bool,

    /// Skip the pre-update snapshot
    #[arg(long, global = true)]
    skip_backup: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// System packages, container images, and blocklists in one pass
    All,
    /// Pull container images and recreate changed services
    Images,
    /// Upgrade host packages
    System,
    /// Refresh DNS filter lists
    Blocklists,
    /// Report available image updates without applying them
    Check,
    /// Restore the most recent snapshot
    Rollback,
}

impl From<&Commands> for UpdateCommand {
    fn from(command: &Commands) -> Self {
        match command {
            Commands::All => UpdateCommand::All,
            Commands::Images => UpdateCommand::Images,
            Commands::System => UpdateCommand::System,
            Commands::Blocklists => UpdateCommand::Blocklists,
            Commands::Check => UpdateCommand::Check,
            Commands::Rollback => UpdateCommand::Rollback,
        }
    }
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Credentials are optional here; only snapshot-touching subcommands
    // need the repository, and the pipeline enforces that.
    let store = config
        .require_repository()
        .ok()
        .map(|(repository, password)| ResticStore::new(repository, password));
    let services = ComposeController::new(&config.stack_dir);
    let notifier = Notifier::from_config(&config);

    let pipeline = UpdatePipeline::new(store.as_ref(), &services, &config, &notifier);
    pipeline.run(&UpdateOptions {
        command: UpdateCommand::from(&cli.command),
        force: cli.force,
        skip_backup: cli.skip_backup,
    })?;
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report::error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
