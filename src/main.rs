//! Speedboard CLI: inspect and export speedtest results from a data directory.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use env_logger::Env;
use log::{info, warn};

use speedboard::aggregate::{
    aggregate, band, data_gap, hourly_profile, latest_run_summary, AggregateQuery, BucketSize,
    GroupBy, Statistic, TimeRange,
};
use speedboard::cache::DatasetCache;
use speedboard::config::Config;
use speedboard::ingest::{parse_timestamp, Dataset, Metric, Timestamp};
use speedboard::report::{self, OutputFormat, SummaryReport};
use speedboard::utils::duration::parse_duration;

#[derive(Parser, Debug)]
#[command(name = "speedboard")]
#[command(about = "Ingest, cache and aggregate speedtest results")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory with one JSON file per speedtest (overrides DATA_DIR)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Optional YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Number of parallel parse workers (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0", global = true)]
    threads: usize,
}

/// Time window selection; defaults to the configured trailing window
#[derive(Args, Debug, Clone, Default)]
struct RangeArgs {
    /// Start of the range (RFC 3339, "YYYY-MM-DD HH:MM:SS" or epoch seconds)
    #[arg(long, value_parser = parse_cli_timestamp)]
    from: Option<Timestamp>,

    /// End of the range, inclusive
    #[arg(long, value_parser = parse_cli_timestamp)]
    to: Option<Timestamp>,

    /// Trailing window ending at the newest record, e.g. "3d" or "12h"
    #[arg(long, value_parser = parse_duration, conflicts_with_all = ["from", "to"])]
    last: Option<Duration>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dataset health, latest run and data freshness
    Summary,

    /// Time-bucketed statistic of one metric
    Aggregate {
        /// Metric to aggregate (download, upload, latency, jitter, ...)
        #[arg(short, long, default_value = "download")]
        metric: Metric,

        /// Split series by route, server or session
        #[arg(short, long, default_value = "route")]
        group_by: GroupBy,

        /// Bucket width, e.g. "10m" or "1h"
        #[arg(short, long, default_value = "10m", value_parser = BucketSize::parse)]
        bucket: BucketSize,

        /// mean, median, count, min, max or pNN
        #[arg(short, long, default_value = "mean")]
        statistic: Statistic,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Median with interquartile band per bucket
    Band {
        #[arg(short, long, default_value = "download")]
        metric: Metric,

        #[arg(short, long, default_value = "10m", value_parser = BucketSize::parse)]
        bucket: BucketSize,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Hour-of-day profile in the display offset
    Profile {
        #[arg(short, long, default_value = "download")]
        metric: Metric,

        #[arg(short, long, default_value = "route")]
        group_by: GroupBy,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Export all records as CSV
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Poll the cache periodically and print its health
    Watch {
        /// Time between polls
        #[arg(short, long, default_value = "1m", value_parser = parse_duration)]
        interval: Duration,

        /// Stop after this many polls
        #[arg(short = 'n', long)]
        iterations: Option<u64>,
    },
}

fn parse_cli_timestamp(s: &str) -> Result<Timestamp, String> {
    parse_timestamp(s).ok_or_else(|| format!("Unrecognized timestamp: {}", s))
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    match dotenv {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }

    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = dir;
    }
    let offset = config.display_offset()?;

    let cache = DatasetCache::new(Arc::new(config.ingestor()?), config.cache_options());
    info!(
        "Reading speedtest results from {} (refresh every {}s)",
        config.data_dir.display(),
        config.refresh_interval.as_secs()
    );

    let output = match cli.command {
        Commands::Summary => {
            let cached = cache
                .get_with_status()
                .context("Unable to load speedtest data")?;
            let dataset = &cached.dataset;
            let report = SummaryReport::new(
                &cached,
                &cache.health(),
                latest_run_summary(dataset, config.recent_run_size),
                data_gap(dataset, Utc::now(), config.stale_data_after),
            );
            if let Some(gap) = &report.data_gap {
                warn!(
                    "Stale data detected: last measurement was {} ago (at {})",
                    gap.description,
                    report::format_timestamp(gap.latest, offset)
                );
            }
            match cli.format {
                OutputFormat::Text => report::summary_text(&report, offset),
                OutputFormat::Json => report::to_json(&report)?,
            }
        }
        Commands::Aggregate {
            metric,
            group_by,
            bucket,
            statistic,
            range,
        } => {
            let dataset = load(&cache)?;
            let query = AggregateQuery {
                metric,
                group_by,
                range: resolve_range(&dataset, &range, &config)?,
                bucket,
                statistic,
            };
            let series = aggregate(&dataset, &query);
            match cli.format {
                OutputFormat::Text => report::series_text(&series, offset),
                OutputFormat::Json => report::to_json(&series)?,
            }
        }
        Commands::Band {
            metric,
            bucket,
            range,
        } => {
            let dataset = load(&cache)?;
            let range = resolve_range(&dataset, &range, &config)?;
            let points = band(&dataset, metric, &range, bucket);
            match cli.format {
                OutputFormat::Text => report::band_text(metric, &points, offset),
                OutputFormat::Json => report::to_json(&points)?,
            }
        }
        Commands::Profile {
            metric,
            group_by,
            range,
        } => {
            let dataset = load(&cache)?;
            let range = resolve_range(&dataset, &range, &config)?;
            let profile = hourly_profile(&dataset, metric, &range, group_by, offset);
            match cli.format {
                OutputFormat::Text => report::profile_text(&profile),
                OutputFormat::Json => report::to_json(&profile)?,
            }
        }
        Commands::Export { output } => {
            let dataset = load(&cache)?;
            let rows = match &output {
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    report::write_csv(&dataset, offset, file)?
                }
                None => report::write_csv(&dataset, offset, io::stdout().lock())?,
            };
            info!("Exported {} records", rows);
            String::new()
        }
        Commands::Watch {
            interval,
            iterations,
        } => {
            watch(&cache, interval, iterations, cli.format)?;
            String::new()
        }
    };

    if !output.is_empty() {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", output).context("Failed to write output")?;
    }

    // let a rebuild started by a stale read finish so the snapshot is current
    cache.wait_idle();
    Ok(())
}

fn load(cache: &DatasetCache) -> Result<Arc<Dataset>> {
    let dataset = cache
        .get_current_dataset()
        .context("Unable to load speedtest data")?;
    if dataset.is_empty() {
        warn!("No data available yet");
    }
    Ok(dataset)
}

fn resolve_range(dataset: &Dataset, args: &RangeArgs, config: &Config) -> Result<TimeRange> {
    let (first, last) = dataset
        .time_extent()
        .ok_or_else(|| eyre!("No data available yet"))?;

    if args.from.is_none() && args.to.is_none() {
        let window = args.last.unwrap_or(config.default_range);
        return TimeRange::trailing(dataset, window).ok_or_else(|| eyre!("No data available yet"));
    }

    let requested = TimeRange::new(args.from.unwrap_or(first), args.to.unwrap_or(last))?;
    Ok(requested.clamp_to(dataset)?)
}

fn watch(
    cache: &DatasetCache,
    interval: Duration,
    iterations: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let mut polls = 0u64;
    loop {
        match cache.get_with_status() {
            Ok(cached) => info!(
                "{} records ({})",
                cached.dataset.len(),
                if cached.is_stale() { "stale" } else { "fresh" }
            ),
            Err(e) => warn!("Dataset unavailable: {}", e),
        }

        let health = cache.health();
        let line = match format {
            OutputFormat::Text => format!(
                "[{}] state={} records={} files={} rejected={} rebuilds={} failed_rebuilds={}",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                health.state,
                health.record_count,
                health.source_file_count,
                health.failure_count,
                health.rebuild_count,
                health.failed_rebuild_count
            ),
            OutputFormat::Json => serde_json::to_string(&health).context("Failed to serialize health")?,
        };
        println!("{}", line);

        polls += 1;
        if iterations.is_some_and(|n| polls >= n) {
            return Ok(());
        }
        thread::sleep(interval);
    }
}
