use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigLoader;
use crate::storage::LogStore;

pub mod commands;

use self::commands::{BuildIndexArgs, MonthsArgs, ThreadArgs};

#[derive(Parser, Debug)]
#[command(
    name = "slacklog",
    version,
    about = "Workspace message archive reader and search index builder"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over SLACKLOG_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the archive data directory (takes precedence over SLACKLOG_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the n-gram search index for every configured channel
    BuildIndex(BuildIndexArgs),
    /// List a channel's months and their message counts
    Months(MonthsArgs),
    /// Print a thread's root message and replies
    Thread(ThreadArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("SLACKLOG_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("SLACKLOG_DATA", path);
    }

    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let loader = ConfigLoader::discover()?;
    let config = loader.load_or_init()?;
    let store = LogStore::open(&config.storage).with_context(|| {
        format!(
            "opening archive at {}",
            config.storage.data_dir.display()
        )
    })?;

    let config = Arc::new(config);
    match cli.command {
        Commands::BuildIndex(args) => commands::build_index(config, &store, args),
        Commands::Months(args) => commands::list_months(config, &store, args),
        Commands::Thread(args) => commands::show_thread(config, &store, args),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|err| anyhow::anyhow!(err))
    })
    .map(|_| ())
}
