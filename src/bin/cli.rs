//! Starwatch CLI
//!
//! Runs the polling scheduler, or performs one-off maintenance tasks against
//! the entity file and the snapshot store.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use starwatch::{
    error::{AppError, Result},
    models::{Config, EntityKey},
    pipeline::{Collaborators, CycleOutcome, Scheduler},
    services::{AocClient, EntityFile, Notifier, TelegramNotifier},
    storage::{LocalStorage, SnapshotStore},
    utils::message,
};

/// Starwatch - private leaderboard watcher
#[derive(Parser, Debug)]
#[command(
    name = "starwatch",
    version,
    about = "Watches Advent of Code private leaderboards and reports changes"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll every enabled entity on its schedule until Ctrl-C
    Run,

    /// Poll every enabled entity once and exit
    Poll {
        /// Maximum number of concurrent polls
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
    },

    /// Validate the configuration and entity files
    Validate,

    /// Show configured entities and stored snapshots
    Info,

    /// Render the stored standings of one entity
    Standings {
        #[arg(long)]
        destination: String,

        #[arg(long)]
        leaderboard: String,

        #[arg(long)]
        year: u16,

        /// Deliver to the destination instead of printing
        #[arg(long)]
        send: bool,
    },
}

/// Initialize logging before the config is read so load warnings are kept.
fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .format_timestamp_secs()
        .init();
}

/// Narrow the level to `--verbose` or the configured level unless `RUST_LOG` is set.
fn apply_log_level(config: &Config, verbose: bool) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        config.logging.level.parse().unwrap_or_else(|_| {
            log::warn!("Unknown log level {:?}; using info", config.logging.level);
            log::LevelFilter::Info
        })
    };
    log::set_max_level(level);
}

/// Resolves when the process is asked to stop.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn build_scheduler(config: &Config, storage: Arc<LocalStorage>) -> Result<Scheduler> {
    let collaborators = Collaborators {
        client: Arc::new(AocClient::new(&config.fetch)?),
        notifier: Arc::new(TelegramNotifier::new(&config.notifier, &config.fetch)?),
        store: storage,
        source: Arc::new(EntityFile::new(&config.storage.entities_file)),
    };
    Ok(Scheduler::new(config, collaborators))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();
    let config = Config::load_or_default(&cli.config);
    apply_log_level(&config, cli.verbose);

    let storage = Arc::new(LocalStorage::new(&config.storage.state_dir));
    let entities = EntityFile::new(&config.storage.entities_file);

    match cli.command {
        Command::Run => {
            config.validate()?;
            storage.ensure_writable().await?;
            log::info!("Starwatch starting...");

            let scheduler = build_scheduler(&config, Arc::clone(&storage))?;
            scheduler.run(shutdown_signal()).await?;
        }

        Command::Poll { concurrency } => {
            config.validate()?;
            storage.ensure_writable().await?;

            let scheduler = build_scheduler(&config, Arc::clone(&storage))?;
            scheduler.refresh().await?;

            let keys: Vec<EntityKey> = scheduler.status().into_iter().map(|s| s.key).collect();
            log::info!("Polling {} entit{}", keys.len(), if keys.len() == 1 { "y" } else { "ies" });

            let outcomes: Vec<_> = stream::iter(keys)
                .map(|key| {
                    let scheduler = scheduler.clone();
                    async move {
                        let outcome = scheduler.poll_now(&key).await;
                        (key, outcome)
                    }
                })
                .buffer_unordered(concurrency.max(1))
                .collect()
                .await;

            let mut failed = 0;
            for (key, outcome) in outcomes {
                match outcome {
                    Some(CycleOutcome::Succeeded(report)) => log::info!(
                        "✓ {}: {} change(s){}",
                        key,
                        report.changes.change_count(),
                        if report.first_run { " (first run)" } else { "" }
                    ),
                    Some(CycleOutcome::Failed { kind, .. }) => {
                        failed += 1;
                        log::warn!("✗ {}: {} failure", key, kind);
                    }
                    Some(CycleOutcome::Disabled { kind }) => {
                        failed += 1;
                        log::error!("✗ {}: disabled after {} failure", key, kind);
                    }
                    None => log::warn!("- {}: skipped", key),
                }
            }
            if failed > 0 {
                log::warn!("{} poll(s) failed", failed);
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");

            match entities.validate().await {
                Ok(count) => log::info!(
                    "✓ Entity file OK ({} entries in {})",
                    count,
                    entities.path().display()
                ),
                Err(e) => {
                    log::error!("Entity file validation failed: {}", e);
                    return Err(e);
                }
            }

            log::info!("All validations passed!");
        }

        Command::Info => {
            log::info!("Config file: {}", cli.config.display());
            log::info!("Entity file: {}", entities.path().display());
            log::info!("State directory: {}", storage.root().display());

            let entries = entities.entries().await?;
            if entries.is_empty() {
                log::info!("No entities configured.");
            }
            for entry in entries {
                let state = if entry.enabled {
                    format!("every {}s", entry.poll_interval_secs)
                } else {
                    format!(
                        "disabled: {}",
                        entry.disabled_reason.as_deref().unwrap_or("no reason recorded")
                    )
                };
                log::info!("Entity {} ({})", entry.key(), state);
            }

            let records = storage.list_records().await?;
            if records.is_empty() {
                log::info!("No snapshots stored yet.");
            }
            for record in records {
                log::info!(
                    "Snapshot {}: {} members, fetched {}, saved {}",
                    record.key,
                    record.snapshot.members.len(),
                    record.snapshot.fetched_at.to_rfc3339(),
                    record.saved_at.to_rfc3339()
                );
            }
        }

        Command::Standings {
            destination,
            leaderboard,
            year,
            send,
        } => {
            let key = EntityKey::new(destination, leaderboard, year);
            let snapshot = storage
                .load(&key)
                .await?
                .ok_or_else(|| AppError::config(format!("No stored snapshot for {}", key)))?;
            let messages = message::format_standings(&snapshot, key.year);

            if send {
                config.validate()?;
                let notifier = TelegramNotifier::new(&config.notifier, &config.fetch)?;
                for text in &messages {
                    notifier.send(&key.destination, text).await?;
                    tokio::time::sleep(config.notifier.message_delay()).await;
                }
                log::info!("Sent standings for {} ({} message(s))", key, messages.len());
            } else {
                for text in &messages {
                    println!("{}", text);
                }
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
