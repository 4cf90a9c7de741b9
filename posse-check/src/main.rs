//! posse-check - Syndicate recent feed items the network has not seen yet

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use libposse::feed::HttpFeedSource;
use libposse::logging;
use libposse::platforms::{create_publisher, PlatformKind};
use libposse::remote::RemoteCheckMethod;
use libposse::runner::{CheckJob, PublishSettings};
use libposse::{Config, PosseError, RunReport, StatusLine, Syndicator};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "posse-check")]
#[command(version)]
#[command(about = "Syndicate recent feed items the network has not seen yet")]
#[command(long_about = "\
posse-check - Syndicate recent feed items the network has not seen yet

DESCRIPTION:
    posse-check keeps no local ledger. For each feed it walks the items
    published within the last DAYS days, oldest first, and asks the network
    whether the account already posted a status linking to the item. The
    first item without one is posted.

    Two ways to ask:
      search   - the network's status search, restricted to the account
      timeline - the account's own statuses, newest first, until the
                 window starts (Mastodon only)

USAGE:
    posse-check --feed https://example.com/feeds/notes.json
    posse-check --platform twitter --feed https://example.com/feeds/links.json
    posse-check --method timeline --application posse --days 6

CONFIGURATION:
    Configuration file: ~/.config/posse/config.toml (or $POSSE_CONFIG)

    [check]
    feeds = [\"https://example.com/feeds/notes.json\"]
    days = 6
    platform = \"mastodon\"
    method = \"search\"

    Credentials come from the environment (a .env file is read too):
    MASTODON_INSTANCE, MASTODON_ACCESS_TOKEN, MASTODON_ACCOUNT_ID,
    MASTODON_APPLICATION, TWITTER_ACCESS_TOKEN, TWITTER_USERNAME

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

    /// Network to post to: mastodon or twitter (overrides config)
    #[arg(short, long, value_name = "NETWORK")]
    platform: Option<PlatformKind>,

    /// How earlier statuses are found: search or timeline (overrides config)
    #[arg(short, long, value_name = "METHOD")]
    method: Option<RemoteCheckMethod>,

    /// Only statuses created by this client application count
    #[arg(long, value_name = "NAME")]
    application: Option<String>,

    /// Configuration file
    #[arg(short, long, value_name = "PATH", env = "POSSE_CONFIG")]
    config: Option<PathBuf>,

    /// Check and log, but do not post
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

    let platform = cli.platform.unwrap_or(config.check.platform);
    let job = CheckJob {
        feeds: if cli.feeds.is_empty() {
            config.check.feeds.clone()
        } else {
            cli.feeds
        },
        days: cli.days.unwrap_or(config.check.days),
        method: cli.method.unwrap_or(config.check.method),
        application: cli.application.or_else(|| match platform {
            PlatformKind::Mastodon => config.mastodon.application.clone(),
            PlatformKind::Twitter => None,
        }),
    };
    info!(
        platform = %platform,
        method = %job.method,
        feeds = job.feeds.len(),
        days = job.days,
        "posse-check starting"
    );

    let publisher = create_publisher(platform, &config)?;
    let source = HttpFeedSource::new(&config.http)?;
    let settings = PublishSettings::from_config(&config, cli.dry_run);

    let mut syndicator = Syndicator::new(Box::new(source), publisher, settings);
    Ok(syndicator.run_check(&job, chrono::Utc::now()).await)
}
