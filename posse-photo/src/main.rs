//! posse-photo - Share the least shared photo again, at a steady pace

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use libposse::config::expand_path;
use libposse::feed::HttpFeedSource;
use libposse::logging;
use libposse::platforms::{create_publisher, PlatformKind};
use libposse::runner::{PhotosJob, PublishSettings};
use libposse::{Config, PosseError, RunReport, StatusLine, Syndicator};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "posse-photo")]
#[command(version)]
#[command(about = "Share the least shared photo again, at a steady pace")]
#[command(long_about = "\
posse-photo - Share the least shared photo again, at a steady pace

DESCRIPTION:
    posse-photo keeps every photo of its feeds in a JSON ledger, together
    with the statuses already published for it. Each run posts one photo
    picked at random among the ones shared the fewest times, so over time
    every photo gets shared as often as the others.

    A run within MIN_INTERVAL of the last publish does nothing and prints
    \"[200] Too soon\".

USAGE:
    # Run from a scheduler every hour; posts at most every 20 hours
    posse-photo

    # Reproducible choice among ties
    posse-photo --seed 42 --dry-run

CONFIGURATION:
    Configuration file: ~/.config/posse/config.toml (or $POSSE_CONFIG)

    [photos]
    feeds = [\"https://example.com/feeds/photos.json\"]
    ledger = \"cache/posse-mastodon-photo.json\"
    timestamp = \"cache/posse-mastodon-photo-timestamp.json\"
    min_interval = \"20h\"

    Credentials come from the environment (a .env file is read too):
    MASTODON_INSTANCE, MASTODON_ACCESS_TOKEN

EXIT CODES:
    0 - Posted, too soon, or nothing to post
    1 - A feed or the post failed, or configuration/authentication failed
")]
struct Cli {
    /// Feed URL (repeatable, overrides config)
    #[arg(short, long = "feed", value_name = "URL")]
    feeds: Vec<String>,

    /// Ledger file (overrides config)
    #[arg(long, value_name = "PATH")]
    ledger: Option<PathBuf>,

    /// Last-publish timestamp file (overrides config)
    #[arg(long, value_name = "PATH")]
    timestamp: Option<PathBuf>,

    /// Minimum time between two publishes, e.g. "20h" (overrides config)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    min_interval: Option<Duration>,

    /// Seed for the random choice among equally shared photos
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Configuration file
    #[arg(short, long, value_name = "PATH", env = "POSSE_CONFIG")]
    config: Option<PathBuf>,

    /// Select and log, but neither post nor write any file
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init_default(cli.verbose);

    match run(cli).await {
        Ok(report) => {
            report.print();
            std::process::exit(report.exit_code());
        }
        Err(e) => {
            println!("{}", error_line(&e));
            std::process::exit(error_exit_code(&e));
        }
    }
}

fn error_line(error: &anyhow::Error) -> StatusLine {
    match error.downcast_ref::<PosseError>() {
        Some(e) => StatusLine::from_error(e),
        None => StatusLine {
            code: 500,
            message: format!("{:#}", error),
        },
    }
}

fn error_exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<PosseError>()
        .map_or(1, PosseError::exit_code)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::load_from_path(path)
                .with_context(|| format!("cannot load {}", path.display()))?;
            config.apply_env();
            config
        }
        None => Config::load()?,
    };
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<RunReport> {
    let config = load_config(cli.config.as_ref())?;

    let job = PhotosJob {
        feeds: if cli.feeds.is_empty() {
            config.photos.feeds.clone()
        } else {
            cli.feeds
        },
        ledger: cli
            .ledger
            .unwrap_or_else(|| expand_path(&config.photos.ledger)),
        timestamp: cli
            .timestamp
            .unwrap_or_else(|| expand_path(&config.photos.timestamp)),
        min_interval: cli.min_interval.unwrap_or(config.photos.min_interval),
        seed: cli.seed,
    };
    info!(
        feeds = job.feeds.len(),
        min_interval = %humantime::format_duration(job.min_interval),
        "posse-photo starting"
    );

    let publisher = create_publisher(PlatformKind::Mastodon, &config)?;
    let source = HttpFeedSource::new(&config.http)?;
    let settings = PublishSettings::from_config(&config, cli.dry_run);

    let mut syndicator = Syndicator::new(Box::new(source), publisher, settings);
    Ok(syndicator.run_photos(&job, chrono::Utc::now()).await)
}
