//! Lifestream CLI
//!
//! Command-line interface for Lifestream - personal activity aggregation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lifestream_core::{Config, RecordType};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "lifestream")]
#[command(about = "Lifestream - personal activity timeline from many providers")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Config file to use instead of the default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new records from providers
    Update {
        /// Provider to run (repeatable, default: all configured)
        #[arg(short, long = "provider")]
        provider: Vec<String>,
    },
    /// List configured providers
    Providers,
    /// Show the timeline, newest first
    Feed {
        /// Only items of this record type
        #[arg(short = 't', long = "type")]
        record_type: Option<RecordType>,
        /// Maximum number of items
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Number of items to skip
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Search item summaries
    Search {
        /// Search query
        query: String,
        /// Maximum number of items
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Show checkpoints and item counts
    Status,
    /// Show configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show effective configuration (secrets masked)
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Update { provider } => commands::update::run(config, provider, &output).await,
        Commands::Providers => commands::providers::list(config, &output).await,
        Commands::Feed {
            record_type,
            limit,
            offset,
        } => {
            let store = commands::open_store(&config)?;
            commands::feed::show(&store, record_type, limit, offset, &output)
        }
        Commands::Search { query, limit } => {
            let store = commands::open_store(&config)?;
            commands::feed::search(&store, &query, limit, &output)
        }
        Commands::Status => {
            let store = commands::open_store(&config)?;
            commands::status::show(&store, &config, &output)
        }
        Commands::Config { command } => match command {
            Some(ConfigCommands::Show) | None => {
                commands::config::show(&config, cli.config.as_ref(), &output)
            }
        },
    }
}

/// Log to stderr; `LIFESTREAM_LOG` wins over `-v`
fn init_logging(verbose: u8) {
    let env_filter = EnvFilter::try_from_env("LIFESTREAM_LOG").unwrap_or_else(|_| {
        let level = match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        EnvFilter::new(format!("lifestream_core={},lifestream={}", level, level))
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
