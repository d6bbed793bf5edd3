//! stack-backup CLI - create a backup of the service stack

use clap::Parser;
use stackhold::pipeline::{BackupOptions, BackupPipeline};
use stackhold::{report, ComposeController, Config, Notifier, ResticStore, Result};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "stack-backup")]
#[command(about = "Create a snapshot of the service stack", long_about = None)]
#[command(version)]
struct Cli {
    /// Keep services running during the backup (crash-consistent capture)
    #[arg(long)]
    no_stop: bool,
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let (repository, password) = config.require_repository()?;

    let store = ResticStore::new(repository, password);
    let services = ComposeController::new(&config.stack_dir);
    let notifier = Notifier::from_config(&config);
    let pipeline = BackupPipeline::new(&store, &services, &config, &notifier);

    pipeline.run(&BackupOptions {
        stop_services: !cli.no_stop,
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
