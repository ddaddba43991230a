//! MarketLake CLI: ingestion runs and dataset inspection.
//!
//! Commands:
//! - `check-config`: parse the config file and report missing credentials
//! - `backfill`: fetch bars, macro series, filings and news over a date range
//! - `poll`: fetch the trailing bar window once and write it
//! - `bulk-stooq`: import a Stooq bulk directory or `.zip` for a tickers list
//!
//! Ctrl-C stops `backfill` and `bulk-stooq` after the current unit; a second
//! Ctrl-C exits at once.
//! - `inspect`: list partitions and row counts of a dataset

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use marketlake_core::data::{
    AlpacaSource, DatasetReader, FetchWindow, FredSource, GdeltSource, PartitionedWriter,
    SecEdgarSource, StooqDirectory,
};
use marketlake_core::{DatasetKind, Timeframe};
use marketlake_runner::{
    import_stooq, load_tickers, BackfillPipeline, CredentialKey, Credentials, Executor,
    IngestConfig, LivePollPipeline, RunSummary,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "marketlake",
    about = "MarketLake: market data ingestion into a partitioned Parquet lake"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print run summaries as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse the config and report every missing credential.
    CheckConfig,
    /// Backfill all datasets over a date range.
    Backfill {
        /// First day (YYYY-MM-DD, UTC).
        #[arg(long)]
        start: String,

        /// Last day, inclusive (YYYY-MM-DD, UTC).
        #[arg(long)]
        end: String,
    },
    /// Poll the trailing bar window once.
    Poll,
    /// Import bars from a Stooq bulk directory or zip archive.
    BulkStooq {
        /// Unpacked bulk directory or the downloaded `.zip`. Defaults to `bulk.source`.
        #[arg(long, visible_aliases = ["dir", "zip"])]
        source: Option<PathBuf>,

        /// CSV with a `symbol` column.
        #[arg(long)]
        tickers: PathBuf,

        /// Target bar width (e.g. 10min, 1hour). Defaults to the config value.
        #[arg(long)]
        target: Option<Timeframe>,
    },
    /// Show partitions, rows and bytes of a dataset (bars, macro, filings, news).
    Inspect {
        dataset: String,
    },
}

fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(2);
        }
    }
}

/// `Ok(false)` when the run finished with failed units or was interrupted.
fn run(cli: Cli) -> Result<bool> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::CheckConfig => check_config(&config),
        Commands::Backfill { start, end } => {
            let cancel = install_interrupt_flag()?;
            let summary = run_backfill(&config, &start, &end, &cancel)?;
            report(&summary, cli.json)
        }
        Commands::Poll => {
            let summary = run_poll(&config)?;
            report(&summary, cli.json)
        }
        Commands::BulkStooq {
            source,
            tickers,
            target,
        } => {
            let source = source
                .or_else(|| config.bulk.source.clone())
                .context("no bulk source: pass --source or set bulk.source")?;
            let cancel = install_interrupt_flag()?;
            let summary = run_bulk(&config, &source, &tickers, target, &cancel)?;
            report(&summary, cli.json)
        }
        Commands::Inspect { dataset } => inspect(&config, &dataset, cli.json),
    }
}

/// Flag raised by the first Ctrl-C. A second one exits immediately.
fn install_interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
        eprintln!("interrupted: stopping after the current unit (Ctrl-C again to exit now)");
    })
    .context("installing Ctrl-C handler")?;
    Ok(flag)
}

fn load_config(path: Option<&Path>) -> Result<IngestConfig> {
    match path {
        Some(path) => IngestConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(IngestConfig::default()),
    }
}

fn check_config(config: &IngestConfig) -> Result<bool> {
    println!("data_dir: {}", config.data_dir.display());
    println!("bar symbols: {}", config.backfill.bar_symbols().join(", "));
    println!(
        "timeframes: {}",
        config
            .backfill
            .timeframes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("macro series: {}", config.backfill.fred_series.join(", "));
    println!("filings for: {} symbols", config.backfill.symbol_to_cik.len());
    Credentials::from_env().validate(&CredentialKey::ALL)?;
    println!("credentials: ok");
    Ok(true)
}

fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn run_backfill(
    config: &IngestConfig,
    start: &str,
    end: &str,
    cancel: &AtomicBool,
) -> Result<RunSummary> {
    let credentials = Credentials::from_env();
    credentials.validate(&CredentialKey::ALL)?;

    let (start, end) = (parse_day(start)?, parse_day(end)?);
    anyhow::ensure!(start <= end, "--start {start} is after --end {end}");
    let window = FetchWindow::new(
        Utc.from_utc_datetime(&start.and_time(chrono::NaiveTime::MIN)),
        Utc.from_utc_datetime(&(end + chrono::Duration::days(1)).and_time(chrono::NaiveTime::MIN)),
    );

    let sources = &config.sources;
    let alpaca = AlpacaSource::new(
        credentials.get(CredentialKey::AlpacaKeyId)?,
        credentials.get(CredentialKey::AlpacaSecretKey)?,
        sources.alpaca_feed.clone(),
    )?
    .with_base_url(sources.alpaca_base_url.clone());
    let fred = FredSource::new(credentials.get(CredentialKey::FredApiKey)?)?
        .with_base_url(sources.fred_base_url.clone());
    let sec = SecEdgarSource::new(credentials.get(CredentialKey::SecUserAgent)?)?
        .with_base_url(sources.sec_base_url.clone());
    let gdelt = GdeltSource::new()?.with_base_url(sources.gdelt_base_url.clone());

    let writer = PartitionedWriter::new(&config.data_dir);
    let executor = Executor::new(&writer).with_retry(config.retry.policy());
    let summary = BackfillPipeline::new(executor)
        .with_bars(&alpaca)
        .with_macro(&fred)
        .with_filings(&sec)
        .with_news(&gdelt)
        .run(&config.backfill, window, Some(cancel))?;
    Ok(summary)
}

fn run_poll(config: &IngestConfig) -> Result<RunSummary> {
    let credentials = Credentials::from_env();
    credentials.validate(&CredentialKey::LIVE)?;

    let alpaca = AlpacaSource::new(
        credentials.get(CredentialKey::AlpacaKeyId)?,
        credentials.get(CredentialKey::AlpacaSecretKey)?,
        config.sources.alpaca_feed.clone(),
    )?
    .with_base_url(config.sources.alpaca_base_url.clone());

    let writer = PartitionedWriter::new(&config.data_dir);
    let executor = Executor::new(&writer).with_retry(config.retry.policy());
    let summary = LivePollPipeline::new(executor, &alpaca).poll_once(&config.live)?;
    Ok(summary)
}

fn run_bulk(
    config: &IngestConfig,
    source: &Path,
    tickers: &Path,
    target: Option<Timeframe>,
    cancel: &AtomicBool,
) -> Result<RunSummary> {
    let target = target.unwrap_or(config.bulk.target_timeframe);
    let native = config.bulk.native_timeframe;
    anyhow::ensure!(
        target.is_multiple_of(native),
        "target {target} is not a multiple of the bulk files' {native} bars"
    );

    let tickers = load_tickers(tickers)?;
    let directory = StooqDirectory::open(source)?.with_native_timeframe(native);
    tracing::info!(
        files = directory.file_count(),
        tickers = tickers.len(),
        archive = directory.is_archive(),
        "indexed bulk source"
    );

    let writer = PartitionedWriter::new(&config.data_dir);
    let executor = Executor::new(&writer).with_retry(config.retry.policy());
    let summary = import_stooq(
        &executor,
        &directory,
        &tickers,
        target,
        config.bulk.continue_on_error,
        Some(cancel),
    )?;
    Ok(summary)
}

fn report(summary: &RunSummary, json: bool) -> Result<bool> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{summary}");
    }
    if summary.cancelled {
        eprintln!(
            "run interrupted with {} unit(s) skipped; rerun the same command to finish",
            summary.skipped
        );
    }
    Ok(summary.is_clean())
}

fn inspect(config: &IngestConfig, dataset: &str, json: bool) -> Result<bool> {
    let kind: DatasetKind = dataset.parse()?;
    let reader = DatasetReader::new(config.dataset_path(kind.dataset_name()));
    let stats = reader.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(true);
    }

    println!("dataset: {} ({kind})", stats.dataset_path.display());
    println!(
        "partitions: {}  rows: {}  bytes: {}",
        stats.partitions, stats.rows, stats.bytes
    );
    for part in reader.partitions()? {
        let rows = part
            .meta
            .as_ref()
            .map_or_else(|| "?".to_string(), |m| m.row_count.to_string());
        println!("  {}  rows={rows}", part.path.display());
    }
    Ok(true)
}
