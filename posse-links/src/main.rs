//! posse-links - Syndicate recent feed items to Mastodon, once each

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use libposse::config::expand_path;
use libposse::feed::HttpFeedSource;
use libposse::logging;
use libposse::platforms::{create_publisher, PlatformKind};
use libposse::runner::{LinksJob, PublishSettings};
use libposse::{Config, PosseError, RunReport, StatusLine, Syndicator};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "posse-links")]
#[command(version)]
#[command(about = "Syndicate recent feed items to Mastodon, once each")]
#[command(long_about = "\
posse-links - Syndicate recent feed items to Mastodon, once each

DESCRIPTION:
    posse-links fetches one or more JSON feeds and, for each feed, posts
    the oldest item published within the last DAYS days that was never
    posted before. Posted items are recorded in a JSON ledger so they are
    never posted twice.

    Image attachments are uploaded along with the status.

USAGE:
    # Use the feeds listed in the configuration file
    posse-links

    # Explicit feeds and window
    posse-links --feed https://example.com/feeds/links.json --days 10

    # Show what would be posted without posting
    posse-links --dry-run --verbose

CONFIGURATION:
    Configuration file: ~/.config/posse/config.toml (or $POSSE_CONFIG)

    [links]
    feeds = [\"https://example.com/feeds/links.json\"]
    days = 10
    ledger = \"cache/posse-mastodon.json\"

    Credentials come from the environment (a .env file is read too):
    MASTODON_INSTANCE, MASTODON_ACCESS_TOKEN

OUTPUT:
    One \"[<code>] <message>\" line per feed on stdout.

EXIT CODES:
    0 - Every feed posted or had nothing to post
    1 - At least one feed failed, or configuration/authentication failed
")]
struct Cli {
    /// Feed URL (repeatable, overrides config)
    #[arg(short, long = "feed", value_name = "URL")]
    feeds: Vec<String>,

    /// Lookback window in days (overrides config)
    #[arg(short, long, value_name = "DAYS")]
    days: Option<u32>,

    /// Ledger file (overrides config)
    #[arg(long, value_name = "PATH")]
    ledger: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, value_name = "PATH", env = "POSSE_CONFIG")]
    config: Option<PathBuf>,

    /// Select and log, but neither post nor write the ledger
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

    let job = LinksJob {
        feeds: if cli.feeds.is_empty() {
            config.links.feeds.clone()
        } else {
            cli.feeds
        },
        days: cli.days.unwrap_or(config.links.days),
        ledger: cli
            .ledger
            .unwrap_or_else(|| expand_path(&config.links.ledger)),
    };
    info!(feeds = job.feeds.len(), days = job.days, ledger = %job.ledger.display(), "posse-links starting");

    let publisher = create_publisher(PlatformKind::Mastodon, &config)?;
    let source = HttpFeedSource::new(&config.http)?;
    let settings = PublishSettings::from_config(&config, cli.dry_run);

    let mut syndicator = Syndicator::new(Box::new(source), publisher, settings);
    Ok(syndicator.run_links(&job, chrono::Utc::now()).await)
}
