use clap::{Args, Parser, Subcommand, builder::styling};
use eyre::{Context, Result};
use owo_colors::OwoColorize;
use pokedex_sync::cli;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// Pokedex Sync: --{dexsync}-> mirrors the PokeAPI into a local relational store
#[derive(Parser)]
#[command(name = "dexsync", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source settings from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch creatures and everything they reference into the store
    Sync(SyncArgs),

    /// Test that the API answers
    Check {
        /// API root, overriding POKEAPI_URL
        #[arg(long)]
        url: Option<String>,
    },

    /// Show row counts of the store
    Stats {
        /// SQLite database file, overriding DEXSYNC_DATABASE
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SyncArgs {
    /// Number of root creatures to ingest
    #[arg(short, long)]
    limit: Option<usize>,

    /// Moves followed per creature
    #[arg(long)]
    related_limit: Option<usize>,

    /// Position in the creature listing to start from
    #[arg(long)]
    offset: Option<usize>,

    /// Roots per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Concurrent fetches
    #[arg(short, long)]
    workers: Option<usize>,

    /// Requests per second
    #[arg(long)]
    rps: Option<f64>,

    /// Requests allowed in a burst
    #[arg(long)]
    burst: Option<u32>,

    /// Retries after a transient fetch failure
    #[arg(long)]
    max_retries: Option<u32>,

    /// abort or skipAndContinue
    #[arg(long)]
    on_batch_failure: Option<String>,

    /// Overlap extract, transform and load of consecutive batches
    #[arg(long)]
    pipelined: bool,

    /// Do not give recoverable failures a second pass at the end of the run
    #[arg(long)]
    skip_retry: bool,

    /// API root, overriding POKEAPI_URL
    #[arg(long)]
    url: Option<String>,

    /// SQLite database file, overriding DEXSYNC_DATABASE
    #[arg(long)]
    database: Option<PathBuf>,

    /// Write the run report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

impl SyncArgs {
    fn options(&self) -> Vec<(String, String)> {
        let mut options = Vec::new();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                options.push((key.to_string(), value));
            }
        };
        push("rootLimit", self.limit.map(|v| v.to_string()));
        push("relatedLimit", self.related_limit.map(|v| v.to_string()));
        push("offset", self.offset.map(|v| v.to_string()));
        push("batchSize", self.batch_size.map(|v| v.to_string()));
        push("concurrency", self.workers.map(|v| v.to_string()));
        push("rateLimitRPS", self.rps.map(|v| v.to_string()));
        push("rateLimitBurst", self.burst.map(|v| v.to_string()));
        push("maxRetries", self.max_retries.map(|v| v.to_string()));
        push("onBatchFailure", self.on_batch_failure.clone());
        push("pipelineMode", self.pipelined.then(|| "pipelined".to_string()));
        push("retryFailed", self.skip_retry.then(|| "false".to_string()));
        push("baseUrl", self.url.clone());
        push("database", self.database.as_ref().map(|p| p.display().to_string()));
        options
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if Path::new(&cli.env).exists() {
        dotenvy::from_filename(&cli.env)
            .with_context(|| format!("Failed to load {}", cli.env))?;
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    match cli.command {
        Commands::Sync(args) => {
            let config = cli::load_run_config(args.options())?;
            log::info!(
                "Syncing {} creature(s) into {}",
                config.root_limit.cyan(),
                config.database.display().bright_black()
            );

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupted, cancelling run");
                    on_interrupt.cancel();
                }
            });

            let report = cli::sync(config, &cancel).await?;
            cli::print_summary(&report);
            if let Some(path) = &args.report {
                cli::write_report(&report, path)?;
            }
            if report.status.is_failed() {
                eyre::bail!("Run failed: {}", report.status);
            }
        }
        Commands::Check { url } => {
            let overrides = url.map(|u| ("baseUrl".to_string(), u)).into_iter().collect();
            let config = cli::load_run_config(overrides)?;
            let total = cli::check_api(&config).await?;
            log::info!(
                "✓ {} answers, {} creature(s) listed",
                config.base_url.as_str().bright_black(),
                total.cyan()
            );
        }
        Commands::Stats { database } => {
            let overrides = database
                .map(|p| ("database".to_string(), p.display().to_string()))
                .into_iter()
                .collect();
            let config = cli::load_run_config(overrides)?;
            log::info!("Row counts in {}", config.database.display().bright_black());
            let counts = cli::store_stats(&config.database)?;
            cli::print_stats(&counts);
        }
    }

    Ok(())
}
