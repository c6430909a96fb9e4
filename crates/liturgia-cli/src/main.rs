//! liturgia - daily liturgy reader backed by a local cache.
//!
//! Reads the liturgy of the day (or any date) through the on-disk cache,
//! keeping the coming week available offline.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use liturgia_core::cache::SystemClock;
use liturgia_core::utils::{date_from_key, parse_date};
use liturgia_core::{
    Config, FileStore, KeyValueStore, LiturgyCache, LiturgyClient, LiturgyDocument,
    LiturgyProvider, CACHE_DAYS,
};

// ============================================================================
// Constants
// ============================================================================

/// Pause between requests while validating the API
const VALIDATE_DELAY_MS: u64 = 500;

type Cache = LiturgyCache<FileStore, LiturgyClient, SystemClock>;

#[derive(Parser, Debug)]
#[command(name = "liturgia")]
#[command(about = "Daily liturgy reader with an offline cache")]
#[command(version)]
struct Args {
    /// Path to config file (default: $XDG_CONFIG_HOME/liturgia/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Liturgy API base URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Directory holding cached liturgies
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show today's liturgy and warm the rest of the week
    Today {
        /// Print the raw JSON document
        #[arg(long)]
        json: bool,
    },
    /// Show the liturgy for a date (YYYY-MM-DD)
    Get {
        #[arg(value_parser = parse_date_arg)]
        date: NaiveDate,
        /// Print the raw JSON document
        #[arg(long)]
        json: bool,
    },
    /// Fetch the coming days into the cache
    Prefetch {
        #[arg(long, default_value_t = CACHE_DAYS)]
        days: u32,
    },
    /// Show the retention window and the cached dates
    Status,
    /// Remove every cached liturgy
    Clear,
    /// Check that the liturgy API answers for a few known dates
    Validate,
}

fn parse_date_arg(s: &str) -> std::result::Result<NaiveDate, String> {
    parse_date(s).ok_or_else(|| format!("expected YYYY-MM-DD, got '{}'", s))
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match args.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env();
    config.apply_overrides(args.api_url.clone(), args.cache_dir.clone());
    Ok(config)
}

fn build_client(config: &Config) -> Result<LiturgyClient> {
    LiturgyClient::with_config(config.api_base_url(), config.request_timeout())
        .context("Failed to build HTTP client")
}

fn build_cache(config: &Config) -> Result<Cache> {
    let dir = config.cache_dir()?;
    let store = FileStore::new(dir.clone())
        .with_context(|| format!("Failed to open cache directory: {}", dir.display()))?;
    Ok(LiturgyCache::new(store, build_client(config)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let _log_guard = init_tracing(args.log_file.as_deref())?;
    let config = load_config(&args)?;
    debug!(?config, "Loaded configuration");

    match args.command {
        Command::Today { json } => {
            let cache = build_cache(&config)?;
            cache.initialize().await;
            let today = cache.today();
            let doc = cache.get_liturgia_by_date(today).await;
            print_outcome(today, doc, json)?;

            // Fill any days the window population could not fetch
            let report = cache.spawn_prefetch(cache.upcoming_dates(CACHE_DAYS)).await?;
            debug!(?report, stats = ?cache.stats(), "Week prefetch finished");
        }
        Command::Get { date, json } => {
            let cache = build_cache(&config)?;
            cache.initialize().await;
            let doc = cache.get_liturgia_by_date(date).await;
            print_outcome(date, doc, json)?;
            debug!(stats = ?cache.stats(), "Lookup finished");
        }
        Command::Prefetch { days } => {
            let cache = build_cache(&config)?;
            cache.initialize().await;
            // Today first so the window is anchored before the other days
            let today = cache.today();
            if let Err(e) = cache.get_liturgia_by_date(today).await {
                eprintln!("Warning: could not fetch today's liturgy: {}", e);
            }
            let report = cache.spawn_prefetch(cache.upcoming_dates(days)).await?;
            println!(
                "Prefetched {} days: {} available, {} not published, {} failed",
                days, report.available, report.missing, report.failed
            );
        }
        Command::Status => {
            let cache = build_cache(&config)?;
            show_status(&cache).await?;
        }
        Command::Clear => {
            let cache = build_cache(&config)?;
            let removed = cache.clear().await.context("Failed to clear cache")?;
            println!("Removed {} cached entries", removed);
        }
        Command::Validate => {
            let client = build_client(&config)?;
            validate(&client).await;
        }
    }

    Ok(())
}

fn print_outcome(
    date: NaiveDate,
    outcome: std::result::Result<Option<LiturgyDocument>, liturgia_core::FetchError>,
    json: bool,
) -> Result<()> {
    match outcome {
        Ok(Some(doc)) if json => {
            println!("{}", serde_json::to_string_pretty(doc.value())?);
        }
        Ok(Some(doc)) => print_document(date, &doc),
        Ok(None) => println!("No liturgy published for {}", date),
        Err(e) => {
            return Err(e).with_context(|| format!("Could not load the liturgy for {}", date));
        }
    }
    Ok(())
}

fn print_document(date: NaiveDate, doc: &LiturgyDocument) {
    let summary = doc.summary();
    println!("{}", summary.data.as_deref().unwrap_or(&date.to_string()));
    if let Some(ref title) = summary.liturgia {
        println!("{}", title);
    }
    if let Some(ref color) = summary.cor {
        println!("Cor: {}", color);
    }
    if let Some(reading) = summary.primeira_leitura.as_ref().and_then(|r| r.referencia.as_deref()) {
        println!("1ª Leitura: {}", reading);
    }
    if let Some(ref psalm) = summary.salmo {
        match (psalm.referencia.as_deref(), psalm.refrao.as_deref()) {
            (Some(r), Some(refrain)) => println!("Salmo: {} - {}", r, refrain),
            (Some(r), None) => println!("Salmo: {}", r),
            _ => {}
        }
    }
    if let Some(reading) = summary.segunda_leitura.as_ref().and_then(|r| r.reference()) {
        println!("2ª Leitura: {}", reading);
    }
    if let Some(gospel) = summary.evangelho.as_ref().and_then(|r| r.referencia.as_deref()) {
        println!("Evangelho: {}", gospel);
    }
}

async fn show_status(cache: &Cache) -> Result<()> {
    match cache.window().await {
        Some(window) => println!("Window: {} .. {}", window.start, window.end),
        None => println!("Window: none"),
    }

    let mut dates: Vec<NaiveDate> = cache
        .store()
        .list_keys()
        .await
        .context("Failed to list cache entries")?
        .iter()
        .filter_map(|k| date_from_key(k))
        .collect();
    dates.sort();

    println!("Cached dates ({}):", dates.len());
    for date in dates {
        println!("  {}", date);
    }
    Ok(())
}

/// Probe the API for today and a few dates around the year boundary.
async fn validate(client: &LiturgyClient) {
    let today = chrono::Local::now().date_naive();
    let mut dates = vec![today];
    dates.extend(
        [(2025, 12, 31), (2026, 1, 1), (2026, 1, 15)]
            .iter()
            .filter_map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
    );

    info!(base_url = client.base_url(), "Validating liturgy API");
    let mut successes = 0;
    for (i, date) in dates.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(VALIDATE_DELAY_MS)).await;
        }
        print!("{} ({}): ", date, client.request_url(*date));
        match client.fetch(*date).await {
            Ok(Some(doc)) => {
                let fields = doc.value().as_object().map(|o| o.len()).unwrap_or(0);
                println!("ok, {} fields", fields);
                successes += 1;
            }
            Ok(None) => println!("empty response"),
            Err(e) => println!("failed: {}", e),
        }
    }

    let rate = successes as f64 * 100.0 / dates.len() as f64;
    println!("{}/{} succeeded ({:.1}%)", successes, dates.len(), rate);
}
