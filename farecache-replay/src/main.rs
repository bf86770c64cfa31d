//! Farecache Replay - drive the cache framework with recorded traffic
//!
//! Builds a registry from configuration, serves fare rules from a JSON
//! fixture file, replays pricing transactions on a pool of workers while
//! an invalidation event file is fed through the change feed, then reports
//! per-cache statistics.

mod fixtures;
mod worker;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use farecache_core::{
    init_logging, CacheRegistry, FrameworkConfig, InvalidationFeed, PrometheusExporter,
};
use fixtures::{CurrentLoader, FareRule, FareRuleKey, FixtureStore, HistoricalLoader, FARE_RULE_CACHE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use worker::WorkerPool;

#[derive(Parser, Debug)]
#[command(name = "farecache-replay")]
#[command(about = "Replay pricing transactions and invalidations against farecache")]
#[command(version)]
struct Args {
    /// Framework configuration (TOML); defaults apply when omitted
    #[arg(short, long, env = "FARECACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Fare rule fixtures (JSON array)
    #[arg(short, long)]
    fixtures: PathBuf,

    /// Invalidation events, one flat key per line
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Transactions to replay
    #[arg(short, long, default_value = "1000")]
    transactions: usize,

    /// Processing date; transactions ticketed before it are historical
    #[arg(long)]
    today: Option<NaiveDate>,

    /// Pre-load every fixture key before replaying
    #[arg(long)]
    warm: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print the Prometheus text exposition after the run
    #[arg(long)]
    metrics: bool,
}

/// Flat invalidation keys from `path`; blank lines and `#` comments skipped
fn read_events(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read events: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = FrameworkConfig::load_or_default(args.config.as_deref())?;
    if args.json_logs {
        config.logging.json_format = true;
    }
    let slow_loads = Arc::new(init_logging(&config.logging)?);

    let today = args.today.unwrap_or_else(|| Utc::now().date_naive());
    let workers = args.workers.unwrap_or_else(num_cpus::get);

    info!("Farecache replay starting");
    info!("  Fixtures: {}", args.fixtures.display());
    info!("  Workers: {}", workers);
    info!("  Transactions: {}", args.transactions);
    info!("  Processing date: {}", today);
    info!("  Historical access: {}", config.historical.enabled);

    let store = Arc::new(FixtureStore::load(&args.fixtures)?);
    info!(rows = store.row_count(), keys = store.keys().len(), "Fixtures loaded");

    let registry = Arc::new(
        CacheRegistry::new(config).with_slow_load_logger(Arc::clone(&slow_loads)),
    );
    registry.create_store::<FareRuleKey, FareRule, _>(FARE_RULE_CACHE, CurrentLoader(Arc::clone(&store)))?;
    registry.create_historical::<FareRuleKey, FareRule, _>(
        FARE_RULE_CACHE,
        HistoricalLoader(Arc::clone(&store)),
    )?;

    if args.warm {
        let loaded = registry.warm_all()?;
        info!(keys = loaded, "Caches warmed");
    }

    let feed = InvalidationFeed::spawn(Arc::clone(&registry))?;
    let events = match &args.events {
        Some(path) => read_events(path)?,
        None => Vec::new(),
    };

    // Events are published while the workers run
    let publisher = {
        let sender = feed.sender();
        tokio::task::spawn_blocking(move || {
            let mut malformed = 0usize;
            for event in &events {
                if let Err(e) = sender.publish_flat(event) {
                    warn!(event = %event, "Event not published: {}", e);
                    malformed += 1;
                }
            }
            (events.len(), malformed)
        })
    };

    let transactions = worker::plan(&store.keys(), args.transactions, today);
    let report = WorkerPool::new(Arc::clone(&registry), workers, today)
        .run(transactions)
        .await?;

    let (published, malformed) = publisher.await?;
    let feed_report = feed.shutdown()?;
    let maintenance = registry.maintain();

    info!("");
    info!("Replay summary:");
    info!(
        "  Transactions: {} ({} historical, {} failed)",
        report.transactions, report.historical, report.failures
    );
    info!("  Records priced: {}", report.records_priced);
    info!(
        "  Events: {} read, {} malformed, {} applied, {} rejected, {} entries removed",
        published, malformed, feed_report.applied, feed_report.rejected, feed_report.entries_removed
    );
    info!(
        "  Maintenance: {} expired, {} compressed",
        maintenance.expired, maintenance.compressed
    );

    let reports = registry.stats();
    for cache in &reports {
        info!(
            "  {}: {} entries, {} hits, {} misses ({:.1}% hit rate), {} loads, {} coalesced, {} invalidated",
            cache.name,
            cache.entries,
            cache.stats.hits,
            cache.stats.misses,
            cache.stats.hit_rate * 100.0,
            cache.stats.loads,
            cache.stats.coalesced_waits,
            cache.stats.invalidated_entries
        );
    }

    let slow = slow_loads.get_stats();
    if slow.total_count > 0 {
        info!(
            "  Slow loads: {} (avg {} ms, max {} ms, threshold {} ms)",
            slow.total_count, slow.avg_duration_ms, slow.max_duration_ms, slow.threshold_ms
        );
    }

    if args.metrics {
        let exporter = PrometheusExporter::new()?;
        exporter.update_metrics(&reports);
        print!("{}", exporter.render()?);
    }

    Ok(())
}
