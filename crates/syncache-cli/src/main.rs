//! syncache - walkthrough and load-stampede demo for the syncache library

mod commands;
mod settings;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::commands::StampedeOptions;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file with cache settings (ttl_ms, cleanup_interval_ms, shards)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Entry TTL in milliseconds, overrides the config file
    #[arg(short, long, global = true)]
    ttl_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, set, and delete a couple of keys
    Demo,

    /// Hit missing keys from many threads at once and print the stats
    Stampede {
        /// Concurrent callers
        #[arg(long, default_value_t = 64)]
        callers: usize,

        /// Distinct keys shared by the callers
        #[arg(long, default_value_t = 4)]
        keys: usize,

        /// How long each load takes, in milliseconds
        #[arg(long, default_value_t = 50)]
        load_ms: u64,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = settings::load(args.config.as_deref(), args.ttl_ms)?;
    info!(
        ttl_ms = config.ttl_ms,
        cleanup_interval_ms = ?config.cleanup_interval_ms,
        shards = config.shards,
        "cache configuration"
    );

    match args.command {
        Command::Demo => commands::demo(&config),
        Command::Stampede {
            callers,
            keys,
            load_ms,
        } => {
            let stats = commands::stampede(
                &config,
                StampedeOptions {
                    callers,
                    keys,
                    load_time: Duration::from_millis(load_ms),
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}
