//! CLI helper functions

use crate::{
    client::PokeApiClient,
    config::{RunConfig, options_from_env},
    etl::{Pipeline, RunReport, RunStatus, Stage},
    pokeapi::GraphExtractor,
    storage::{Store, StoreLoader, TableCounts},
    transform::PayloadTransformer,
};
use eyre::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Build the run configuration
///
/// Options are layered lowest to highest precedence:
/// - Built-in defaults
/// - Environment variables (`POKEAPI_URL`, `DEXSYNC_*`)
/// - `overrides`, usually taken from command-line flags
pub fn load_run_config(overrides: Vec<(String, String)>) -> Result<RunConfig> {
    let options = options_from_env().into_iter().chain(overrides);
    RunConfig::from_options(options).context("Invalid run configuration")
}

/// Create the API client for `config`
pub fn load_client(config: &RunConfig) -> Result<PokeApiClient> {
    PokeApiClient::try_new(config.base_url.clone(), config.request_timeout)
        .with_context(|| format!("Failed to create client for {}", config.base_url))
}

/// Open the store at `path`, creating the schema if needed
pub fn open_store(path: impl AsRef<Path>) -> Result<Store> {
    let path = path.as_ref();
    Store::open(path).with_context(|| format!("Failed to open store {}", path.display()))
}

/// Mirror the configured slice of the API into the store
///
/// Pipeline: GraphExtractor → PayloadTransformer → StoreLoader
pub async fn sync(config: RunConfig, cancel: &CancellationToken) -> Result<RunReport> {
    log::info!("Syncing from {}", config.base_url.as_str().bright_black());
    let client = Arc::new(load_client(&config)?);

    let store = Arc::new(open_store(&config.database)?);
    log::info!("Writing to {}", store.location().bright_black());

    let extractor = GraphExtractor::new(client, &config);
    let transformer = PayloadTransformer::new(config.related_limit);
    let loader =
        StoreLoader::new(store).with_retries(config.store_retries, config.initial_backoff);

    let pipeline = Pipeline::try_new(config, extractor, transformer, loader)
        .context("Invalid run configuration")?;
    Ok(pipeline.run(cancel).await)
}

/// Check that the API answers, returning the number of creatures it lists
pub async fn check_api(config: &RunConfig) -> Result<u64> {
    log::info!("Checking {}", config.base_url.as_str().bright_black());
    let client = load_client(config)?;
    client.test_connection().await
}

/// Row counts of the store at `path`
pub fn store_stats(path: impl AsRef<Path>) -> Result<TableCounts> {
    let store = open_store(path)?;
    store.counts().context("Failed to count rows")
}

/// Write `report` as pretty JSON to `path`
pub fn write_report(report: &RunReport, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let json = report.to_json().context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    log::info!("Run report written to {}", path.display().bright_black());
    Ok(())
}

/// Log a human-readable summary of `report`
pub fn print_summary(report: &RunReport) {
    let counts = &report.counts;
    match &report.status {
        RunStatus::Success => log::info!("Run status: {}", "Success".green()),
        RunStatus::PartialSuccess => log::info!("Run status: {}", "PartialSuccess".yellow()),
        RunStatus::Failed { cause } => {
            log::error!("Run status: {} ({})", "Failed".red(), cause)
        }
    }

    log::info!(
        "Creatures loaded: {} of {} ({:.1}%) in {:.1}s",
        counts.creatures_loaded.cyan(),
        counts.roots.cyan(),
        report.success_rate(),
        report.elapsed_ms as f64 / 1000.0
    );
    log::info!(
        "Fetched {} resource(s) ({} failed), normalized {} ({} invalid), {} row(s) written in {} batch(es)",
        counts.fetched.cyan(),
        counts.fetch_failed,
        counts.transformed.cyan(),
        counts.transform_failed,
        counts.rows_written.cyan(),
        counts.batches_committed
    );
    if counts.batches_failed > 0 {
        log::warn!("{} batch(es) rolled back", counts.batches_failed.red());
    }

    let failed = report.failed_creatures();
    if !failed.is_empty() {
        let ids: Vec<String> = failed.iter().map(i64::to_string).collect();
        log::warn!("Failed creature ids: {}", ids.join(", ").red());
    }

    for stage in [Stage::Discover, Stage::Extract, Stage::Transform, Stage::Load] {
        for failure in report.failures_in(stage) {
            log::debug!(
                "[{}] {} {} after {} attempt(s): {}",
                stage,
                failure.kind,
                failure.resource,
                failure.attempts,
                failure.message
            );
        }
    }
    if !report.skipped_relations.is_empty() {
        log::debug!(
            "{} relation(s) skipped for missing parents",
            report.skipped_relations.len()
        );
    }
}

/// Log row counts per table
pub fn print_stats(counts: &TableCounts) {
    let width = counts.keys().map(|name| name.len()).max().unwrap_or(0);
    for (table, count) in counts {
        log::info!("{:width$}  {}", table, count.cyan(), width = width);
    }
}
