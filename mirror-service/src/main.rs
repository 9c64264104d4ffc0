//! strm-mirror
//!
//! Mirrors media library folders, rewriting the target of every `.strm`
//! redirect file on the way.
//!
//! # Usage
//!
//! ```bash
//! strm-mirror [--config <toml>] [--records <yaml>] [--json] <command>
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Control log verbosity (default: `strm_mirror=info`)
//!
//! Logs go to stderr; command output goes to stdout.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use strm_mirror_service::{MirrorService, ServiceConfig, SyncRecord, SyncStats, YamlRecordStore};

const DEFAULT_LOG_FILTER: &str = "strm_mirror=info,strm_mirror_core=info,strm_mirror_service=info";

/// Mirror folders and rewrite .strm redirect files
#[derive(Parser)]
#[command(name = "strm-mirror")]
#[command(about = "Mirror folders and rewrite .strm redirect files")]
#[command(version)]
struct Cli {
    /// Service configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Records file (YAML), overriding the configured one
    #[arg(short, long)]
    records: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fully reconcile one record, or all of them
    Sync {
        /// Record id
        record_id: Option<String>,
    },
    /// Watch one record, or all of them, until interrupted
    Watch {
        /// Record id
        record_id: Option<String>,
    },
    /// List configured records and whether they are watched
    Status,
    /// Check the records file
    Validate,
    /// Add a record, or replace one when --id names an existing record
    Save {
        /// Folder to mirror
        source_folder: String,
        /// Mirror destination
        target_folder: String,
        /// Record id to replace
        #[arg(long)]
        id: Option<String>,
        /// Text to replace in redirect files
        #[arg(long, default_value = "")]
        search: String,
        /// Replacement for the first match
        #[arg(long, default_value = "")]
        replace: String,
    },
    /// Remove a record; mirrored files are kept
    Remove {
        /// Record id
        record_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli {
        config,
        records,
        json,
        command,
    } = Cli::parse();

    let config_path = config.unwrap_or_else(ServiceConfig::default_path);
    let mut config = ServiceConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    if let Some(records) = records {
        config.records_path = records;
    }

    match command {
        Command::Sync { record_id } => {
            let service = MirrorService::from_config(&config)?;
            let stats = match record_id.as_deref() {
                Some(id) => service.sync_record(id).await?,
                None => service.sync_all_records().await?,
            };
            print_stats(&stats, json)?;
        }
        Command::Watch { record_id } => {
            let service = MirrorService::from_config(&config)?;
            let summary = service.start_watch(record_id.as_deref()).await?;
            if summary.started == 0 {
                bail!("no watches started ({summary})");
            }
            info!("{summary}; press Ctrl-C to stop");

            wait_for_shutdown().await?;
            service.shutdown().await;
        }
        Command::Status => {
            let service = MirrorService::from_config(&config)?;
            print_status(&service.status().await?, json)?;
        }
        Command::Validate => {
            let records = YamlRecordStore::new(&config.records_path)
                .validate()
                .with_context(|| format!("invalid records in {}", config.records_path.display()))?;
            if json {
                print_json(&serde_json::json!({ "valid": true, "records": records.len() }))?;
            } else {
                println!(
                    "{}: {} records OK",
                    config.records_path.display(),
                    records.len()
                );
            }
        }
        Command::Save {
            source_folder,
            target_folder,
            id,
            search,
            replace,
        } => {
            let service = MirrorService::from_config(&config)?;
            let record = SyncRecord::new(id.unwrap_or_default(), source_folder, target_folder)
                .with_rewrite(search, replace);
            let saved = service.save_record(record).await?;
            if json {
                print_json(&saved)?;
            } else {
                println!("saved {}", saved.record.id);
            }
        }
        Command::Remove { record_id } => {
            let service = MirrorService::from_config(&config)?;
            service.delete_record(&record_id).await?;
            if json {
                print_json(&serde_json::json!({ "removed": record_id }))?;
            } else {
                println!("removed {record_id}");
            }
        }
    }

    Ok(())
}

fn print_stats(stats: &SyncStats, json: bool) -> Result<()> {
    if json {
        return print_json(stats);
    }
    println!(
        "created {}, updated {}, deleted {}, errors {}",
        stats.created, stats.updated, stats.deleted, stats.errors
    );
    Ok(())
}

fn print_status(status: &BTreeMap<String, bool>, json: bool) -> Result<()> {
    if json {
        return print_json(status);
    }
    if status.is_empty() {
        println!("no records configured");
    }
    for (id, active) in status {
        let state = if *active { "watching" } else { "idle" };
        println!("{id}\t{state}");
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    Ok(())
}
