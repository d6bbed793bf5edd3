//! stack-restore CLI - inspect and restore stack snapshots

use clap::{Parser, Subcommand};
use stackhold::pipeline::{RestoreOptions, RestorePipeline};
use stackhold::{
    report, ComposeController, Config, Error, Notifier, ResticStore, Result, Selector,
    SnapshotStore,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "stack-restore")]
#[command(about = "Restore the service stack from a snapshot", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Staging directory for extraction
    #[arg(long, global = true)]
    target: Option<PathBuf>,

    /// Extract only; never swap the live installation
    #[arg(long, global = true)]
    no_replace: bool,

    /// Leave services stopped after the swap
    #[arg(long, global = true)]
    no_start: bool,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y', global = true)]
    yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List snapshots in the repository
    List,

    /// Restore a snapshot (defaults to the most recent one)
    Restore {
        /// Snapshot id, full or short prefix
        snapshot_id: Option<String>,
    },

    /// Restore the most recent snapshot
    Latest,

    /// Restore the most recent snapshot from a given day
    Date {
        /// Day to restore from (YYYY-MM-DD)
        date: String,
    },

    /// Extract a snapshot to the staging path for inspection
    Extract {
        /// Snapshot id, full or short prefix
        snapshot_id: String,
    },
}

fn cmd_list(store: &impl SnapshotStore) -> Result<()> {
    let snapshots = store.list_snapshots()?;
    if snapshots.is_empty() {
        report::info("No snapshots in the repository");
        return Ok(());
    }

    println!("{:<12} {:<22} {:<24} {}", "ID", "TIME", "TAGS", "PATHS");
    println!("{:<12} {:<22} {:<24} {}", "--", "----", "----", "-----");
    for snapshot in snapshots {
        let paths: Vec<String> = snapshot
            .paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        println!(
            "{:<12} {:<22} {:<24} {}",
            snapshot.short(),
            snapshot.time.format("%Y-%m-%d %H:%M:%S"),
            snapshot.tags.join(","),
            paths.join(",")
        );
    }
    Ok(())
}

fn confirm_replace(config: &Config) -> Result<()> {
    report::warn(&format!(
        "This will replace the current installation at {}",
        config.stack_dir.display()
    ));
    report::warn("The replaced tree is preserved with a timestamp suffix.");

    use std::io::{self, Write};
    print!("Type 'yes' to continue: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    if input.trim() != "yes" {
        return Err(Error::Other("Aborted".to_string()));
    }
    Ok(())
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let (repository, password) = config.require_repository()?;

    let store = ResticStore::new(repository, password);
    let services = ComposeController::new(&config.stack_dir);
    let notifier = Notifier::from_config(&config);

    let (selector, extract_only) = match &cli.command {
        Commands::List => return cmd_list(&store),
        Commands::Restore { snapshot_id } => (
            snapshot_id
                .as_ref()
                .map(|id| Selector::Id(id.clone()))
                .unwrap_or(Selector::Latest),
            false,
        ),
        Commands::Latest => (Selector::Latest, false),
        Commands::Date { date } => (Selector::date(date).map_err(Error::Other)?, false),
        Commands::Extract { snapshot_id } => (Selector::Id(snapshot_id.clone()), true),
    };

    let replace = !extract_only && !cli.no_replace;
    if replace && !cli.yes {
        confirm_replace(&config)?;
    }

    let pipeline = RestorePipeline::new(&store, &services, &config, &notifier);
    pipeline.run(&RestoreOptions {
        selector,
        target: cli.target.clone(),
        extract_only,
        replace,
        start_services: !cli.no_start,
        ..RestoreOptions::default()
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
