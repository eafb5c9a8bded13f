use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use panocrawl::{
    acquire::Acquirer,
    config::{Config, HeadingSource, Mode},
    coordinate::{ApiTransform, LocalTransform, compare_transforms},
    http::HttpClient,
    job::BatchJob,
    progress::create_reporter,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Tiananmen, Oriental Pearl Tower, Canton Tower, Ping An Finance Centre and
/// Times Square.
const REFERENCE_POINTS: [(f64, f64); 5] = [
    (116.397428, 39.90923),
    (121.4952, 31.2424),
    (113.3172, 23.1192),
    (114.0552, 22.5435),
    (-73.9855, 40.7580),
];

#[derive(Parser)]
#[command(version, about = "Street view crawler")]
struct Opts {
    #[clap(short, long, env = "PANOCRAWL_CONFIG", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch imagery for every point of the input table.
    Crawl(CrawlOpts),
    /// Check local coordinate conversion against the remote API.
    Compare(CompareOpts),
}

#[derive(Args)]
struct CrawlOpts {
    #[clap(long)]
    input: Option<PathBuf>,
    #[clap(long)]
    output: Option<PathBuf>,
    /// Capture year, latest when omitted.
    #[clap(long)]
    year: Option<String>,
    #[clap(long, value_enum)]
    mode: Option<Mode>,
    #[clap(long, value_enum)]
    heading: Option<HeadingSource>,
    #[clap(long)]
    batch: Option<usize>,
    /// Skip points already present in the output or checkpoint.
    #[clap(long)]
    resume: bool,
}

#[derive(Args)]
struct CompareOpts {
    #[clap(long, env = "BAIDU_API_KEY")]
    api_key: Option<String>,
    /// `LON,LAT` pairs; a built-in reference set when omitted.
    #[clap(value_parser = parse_point)]
    points: Vec<(f64, f64)>,
}

fn parse_point(text: &str) -> Result<(f64, f64), String> {
    let (lon, lat) = text
        .split_once(',')
        .ok_or_else(|| format!("expected LON,LAT, got {text:?}"))?;
    let parse = |value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("{value:?}: {e}"))
    };
    Ok((parse(lon)?, parse(lat)?))
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.validate()?;
    Ok(config)
}

async fn crawl(mut config: Config, opts: CrawlOpts) -> anyhow::Result<()> {
    if let Some(input) = opts.input {
        config.paths.input = input;
    }
    if let Some(output) = opts.output {
        config.paths.output = output;
    }
    if opts.year.is_some() {
        config.target_year = opts.year;
    }
    if let Some(mode) = opts.mode {
        config.mode = mode;
    }
    if let Some(heading) = opts.heading {
        config.heading_source = heading;
    }
    if let Some(batch) = opts.batch {
        config.batch_size = batch;
    }
    config.resume |= opts.resume;
    config.validate()?;

    info!(
        input = ?config.paths.input,
        output = ?config.paths.output,
        mode = ?config.mode,
        heading = ?config.heading_source,
        year = config.target_year().unwrap_or("latest"),
        "starting crawl"
    );
    let client = HttpClient::new(&config.http).with_context(|| "build http client")?;
    let job = BatchJob {
        fetch: &client,
        transform: &LocalTransform,
        config: &config,
        acquirer: Acquirer::from_config(&config),
        reporter: create_reporter(),
    };
    let summary = job.run().await.with_context(|| "crawl")?;
    info!(
        processed = summary.processed,
        rows = summary.total_rows,
        "crawl finished"
    );
    Ok(())
}

async fn compare(config: Config, opts: CompareOpts) -> anyhow::Result<()> {
    let api_key = opts
        .api_key
        .or(config.api_key.clone())
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow!("an API key is required (--api-key, BAIDU_API_KEY or api_key)"))?;
    let points = if opts.points.is_empty() {
        REFERENCE_POINTS.to_vec()
    } else {
        opts.points
    };
    let tolerance = config.max_divergence_m;
    let client = HttpClient::new(&config.http).with_context(|| "build http client")?;
    let remote = ApiTransform::new(&client, &config.endpoints.geoconv, &api_key);
    let comparisons = compare_transforms(&remote, &LocalTransform, &points, tolerance).await;

    for comparison in &comparisons {
        println!("({}, {})", comparison.lon, comparison.lat);
        match &comparison.outcome {
            Ok(divergence) => {
                println!(
                    "  x  api {:.6}  local {:.6}  diff {:.6} m",
                    divergence.reference.x,
                    divergence.candidate.x,
                    divergence.dx()
                );
                println!(
                    "  y  api {:.6}  local {:.6}  diff {:.6} m",
                    divergence.reference.y,
                    divergence.candidate.y,
                    divergence.dy()
                );
            }
            Err(e) => println!("  conversion failed: {e}"),
        }
    }
    let diverging = comparisons
        .iter()
        .filter(|comparison| comparison.exceeds(tolerance))
        .count();
    if diverging > 0 {
        bail!(
            "{diverging} of {} points diverge by more than {tolerance} m",
            comparisons.len()
        );
    }
    Ok(())
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let config = load_config(opts.config.as_deref())?;
    match opts.command {
        Command::Crawl(crawl_opts) => crawl(config, crawl_opts).await,
        Command::Compare(compare_opts) => compare(config, compare_opts).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    if let Err(e) = run(opts).await {
        error!(?e, "critical error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
