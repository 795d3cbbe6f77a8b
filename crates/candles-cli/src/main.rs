use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use candles_core::series::CandleSeries;
use candles_core::timezone::SourceZone;
use candles_providers::paginator::{CandlePaginator, PaginatorConfig};
use candles_providers::upbit::UpbitProvider;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "upbit-candles",
    about = "Fetch Upbit minute candles over arbitrary time ranges"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the Upbit API base URL
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a single page of candles ending at --end
    Page {
        /// Candle unit in minutes
        #[arg(short, long)]
        unit: u32,

        /// Market code (e.g. KRW-BTC)
        #[arg(short, long)]
        market: String,

        /// Number of candles (max 200)
        #[arg(long, default_value_t = 200)]
        count: u32,

        /// Last candle time (YYYY-MM-DDTHH:mm:ss, or ...Z with --tz utc). Defaults to latest.
        #[arg(long)]
        end: Option<String>,

        /// Timezone of --end: kst, utc
        #[arg(long, default_value = "kst")]
        tz: SourceZone,
    },

    /// Fetch every candle from --start to --end
    Range {
        /// Candle unit in minutes
        #[arg(short, long)]
        unit: u32,

        /// Market code (e.g. KRW-BTC)
        #[arg(short, long)]
        market: String,

        /// First candle time (YYYY-MM-DDTHH:mm:ss, or ...Z with --tz utc)
        #[arg(long)]
        start: String,

        /// Last candle time. Defaults to latest.
        #[arg(long)]
        end: Option<String>,

        /// Timezone of --start and --end: kst, utc
        #[arg(long, default_value = "kst")]
        tz: SourceZone,

        /// Pause between page requests in milliseconds
        #[arg(long, default_value_t = 100)]
        delay_ms: u64,

        /// Retries when rate limited (0 disables)
        #[arg(long, default_value_t = 0)]
        max_retries: u32,

        /// Emit candles oldest-first instead of fetch order
        #[arg(long)]
        ascending: bool,

        /// Write JSON to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn create_provider(base_url: Option<&str>) -> UpbitProvider {
    match base_url {
        Some(url) => UpbitProvider::with_base_url(url.to_string()),
        None => UpbitProvider::new(),
    }
}

fn write_json(series: &CandleSeries, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), series)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("wrote {} candle(s) to {}", series.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, series)
                .context("failed to write to stdout")?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

async fn cmd_page(
    provider: UpbitProvider,
    unit: u32,
    market: &str,
    count: u32,
    end: Option<&str>,
    tz: SourceZone,
) -> Result<()> {
    let paginator = CandlePaginator::new(provider);
    let records = paginator
        .fetch_page(unit, market, count, end, tz)
        .await
        .with_context(|| format!("failed to fetch {market} {unit}m candles"))?;
    write_json(&CandleSeries::from(records), None)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_range(
    provider: UpbitProvider,
    unit: u32,
    market: &str,
    start: &str,
    end: Option<&str>,
    tz: SourceZone,
    config: PaginatorConfig,
    ascending: bool,
    output: Option<&Path>,
) -> Result<()> {
    let paginator = CandlePaginator::with_config(provider, config);
    let series = paginator
        .fetch_range(unit, market, start, end, tz)
        .await
        .with_context(|| format!("failed to fetch {market} {unit}m candles from {start}"))?;

    let series = if ascending {
        series.into_ascending()
    } else {
        series
    };
    write_json(&series, output)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    let provider = create_provider(cli.base_url.as_deref());

    match &cli.command {
        Commands::Page {
            unit,
            market,
            count,
            end,
            tz,
        } => {
            cmd_page(provider, *unit, market, *count, end.as_deref(), *tz).await?;
        }
        Commands::Range {
            unit,
            market,
            start,
            end,
            tz,
            delay_ms,
            max_retries,
            ascending,
            output,
        } => {
            let config = PaginatorConfig {
                delay: Duration::from_millis(*delay_ms),
                max_retries: *max_retries,
                ..PaginatorConfig::default()
            };
            cmd_range(
                provider,
                *unit,
                market,
                start,
                end.as_deref(),
                *tz,
                config,
                *ascending,
                output.as_deref(),
            )
            .await?;
        }
    }

    Ok(())
}
