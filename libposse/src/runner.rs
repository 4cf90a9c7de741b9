//! Run orchestration
//!
//! A [`Syndicator`] drives one batch run: fetch the feeds, pick what to
//! publish, stage the images, publish, record the result and persist the
//! ledger. Every terminal outcome becomes a [`StatusLine`]; the binaries
//! print them and exit with [`RunReport::exit_code`].
//!
//! Three runs are offered:
//!
//! - [`Syndicator::run_links`]: recent items, each at most once, tracked in
//!   a local ledger. One item per feed.
//! - [`Syndicator::run_photos`]: least syndicated ledger entry, throttled by
//!   a minimum interval between publishes. One item per run.
//! - [`Syndicator::run_check`]: recent items, each at most once, checked
//!   against the network itself. One item per feed.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{FeedError, PosseError, Result};
use crate::feed::FeedSource;
use crate::ledger::{Ledger, RunTimestamp};
use crate::platforms::Publisher;
use crate::remote::{RemoteCheck, RemoteCheckMethod};
use crate::selector::{eligible_recent, merge_items, select_least_syndicated, window_candidates, Window};
use crate::stager::{AttachmentStager, MediaFailurePolicy};
use crate::text::prepare_status;
use crate::types::{Feed, FeedItem, NewPost, PublishedPost, Visibility};

pub const NO_ITEM: &str = "No item found to process.";
pub const TOO_SOON: &str = "Too soon";

/// One `[<code>] <message>` line of run output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: u16,
    pub message: String,
}

impl StatusLine {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            code: 200,
            message: message.into(),
        }
    }

    pub fn from_error(error: &PosseError) -> Self {
        Self {
            code: error.status_code(),
            message: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code < 400
    }
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Everything a run reported
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub lines: Vec<StatusLine>,
    /// Statuses created during the run
    pub published: Vec<PublishedPost>,
}

impl RunReport {
    fn push(&mut self, line: StatusLine) {
        if line.is_success() {
            debug!("{}", line);
        } else {
            warn!("{}", line);
        }
        self.lines.push(line);
    }

    fn push_error(&mut self, error: PosseError) {
        self.push(StatusLine::from_error(&error));
    }

    fn fatal(mut self, error: PosseError) -> Self {
        self.push_error(error);
        self
    }

    pub fn is_success(&self) -> bool {
        self.lines.iter().all(StatusLine::is_success)
    }

    /// Write the status lines to stdout
    pub fn print(&self) {
        for line in &self.lines {
            println!("{}", line);
        }
    }

    /// 0 when every outcome succeeded or was a no-op, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// How statuses are written, shared by every run
#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub visibility: Visibility,
    pub defuse_mentions_on: Vec<String>,
    pub temp_dir: PathBuf,
    pub media_policy: MediaFailurePolicy,
    /// Select and log only; never write to the network or to disk
    pub dry_run: bool,
}

impl PublishSettings {
    pub fn from_config(config: &Config, dry_run: bool) -> Self {
        Self {
            visibility: config.mastodon.visibility,
            defuse_mentions_on: config.mastodon.defuse_mentions_on.clone(),
            temp_dir: config.media.temp_dir(),
            media_policy: config.media.on_failure,
            dry_run,
        }
    }
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            visibility: Visibility::Public,
            defuse_mentions_on: Vec::new(),
            temp_dir: std::env::temp_dir(),
            media_policy: MediaFailurePolicy::Skip,
            dry_run: false,
        }
    }
}

/// Recent items at most once, tracked in a local ledger
#[derive(Debug, Clone)]
pub struct LinksJob {
    pub feeds: Vec<String>,
    pub days: u32,
    pub ledger: PathBuf,
}

/// Least syndicated item, at most one publish per `min_interval`
#[derive(Debug, Clone)]
pub struct PhotosJob {
    pub feeds: Vec<String>,
    pub ledger: PathBuf,
    pub timestamp: PathBuf,
    pub min_interval: Duration,
    /// Seed for the tie-break; entropy when `None`
    pub seed: Option<u64>,
}

/// Recent items at most once, checked against the network
#[derive(Debug, Clone)]
pub struct CheckJob {
    pub feeds: Vec<String>,
    pub days: u32,
    pub method: RemoteCheckMethod,
    /// Only statuses created by this client count as earlier posts
    pub application: Option<String>,
}

pub struct Syndicator {
    source: Box<dyn FeedSource>,
    publisher: Box<dyn Publisher>,
    settings: PublishSettings,
}

impl Syndicator {
    pub fn new(
        source: Box<dyn FeedSource>,
        publisher: Box<dyn Publisher>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            source,
            publisher,
            settings,
        }
    }

    fn network(&self) -> String {
        let name = self.publisher.name();
        let mut chars = name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    fn posted_line(&self, item: &FeedItem, post: &PublishedPost) -> StatusLine {
        StatusLine::ok(format!(
            "Item \"{}\" successfully posted to {}: {}",
            item.title,
            self.network(),
            post.url
        ))
    }

    fn dry_run_line(&self, item: &FeedItem) -> StatusLine {
        StatusLine::ok(format!(
            "Dry run: would post \"{}\" ({}) to {}",
            item.title,
            item.url,
            self.network()
        ))
    }

    async fn authenticate(&mut self) -> Result<()> {
        self.publisher.authenticate().await?;
        debug!(network = self.publisher.name(), "authenticated");
        Ok(())
    }

    /// Fetch every feed concurrently, keeping feed order
    async fn fetch_all(&self, feeds: &[String]) -> Vec<std::result::Result<Feed, FeedError>> {
        join_all(feeds.iter().map(|url| self.source.fetch_feed(url))).await
    }

    /// Prepare, stage and publish one item
    ///
    /// Returns `None` on a dry run.
    pub async fn publish(&self, item: &FeedItem) -> Result<Option<PublishedPost>> {
        let text = prepare_status(
            &item.content_text,
            self.publisher.instance_url(),
            &self.settings.defuse_mentions_on,
        );
        self.publisher.validate_content(&text)?;

        if self.settings.dry_run {
            info!(
                url = %item.url,
                images = item.image_attachments().count(),
                "Dry run, not posting \"{}\": {}",
                item.title,
                text
            );
            return Ok(None);
        }

        info!(url = %item.url, chars = text.chars().count(), "Posting \"{}\"", item.title);

        let stager = AttachmentStager::new(
            self.source.as_ref(),
            self.publisher.as_ref(),
            self.settings.temp_dir.clone(),
            self.settings.media_policy,
        );
        let media_ids = stager.stage(item).await?;

        let post = NewPost {
            text,
            media_ids,
            visibility: self.settings.visibility,
            language: item.lang.clone(),
        };
        let published = self.publisher.create_post(&post).await?;
        Ok(Some(published))
    }

    /// Publish one selected item per feed concurrently and report each
    async fn publish_selected(
        &self,
        selected: &[FeedItem],
        report: &mut RunReport,
    ) -> Vec<(FeedItem, PublishedPost)> {
        let outcomes = join_all(selected.iter().map(|item| self.publish(item))).await;

        let mut published = Vec::new();
        for (item, outcome) in selected.iter().zip(outcomes) {
            match outcome {
                Ok(Some(post)) => {
                    report.push(self.posted_line(item, &post));
                    report.published.push(post.clone());
                    published.push((item.clone(), post));
                }
                Ok(None) => report.push(self.dry_run_line(item)),
                Err(e) => report.push_error(e),
            }
        }
        published
    }

    fn require_feeds(feeds: &[String]) -> Result<()> {
        if feeds.is_empty() {
            return Err(PosseError::InvalidInput("no feed configured".to_string()));
        }
        Ok(())
    }

    fn persist_ledger(&self, ledger: &mut Ledger, path: &std::path::Path, report: &mut RunReport) {
        if self.settings.dry_run {
            if ledger.is_dirty() {
                info!(path = %path.display(), "Dry run, ledger not written");
            }
            return;
        }
        match ledger.persist(path) {
            Ok(true) => info!(path = %path.display(), entries = ledger.len(), "ledger saved"),
            Ok(false) => {}
            Err(e) => report.push_error(e.into()),
        }
    }

    /// Publish the oldest recent item of each feed that the ledger has never seen
    pub async fn run_links(&mut self, job: &LinksJob, now: DateTime<Utc>) -> RunReport {
        let report = RunReport::default();
        if let Err(e) = Self::require_feeds(&job.feeds) {
            return report.fatal(e);
        }

        let mut ledger = match Ledger::load(&job.ledger) {
            Ok(ledger) => ledger,
            Err(e) => return report.fatal(e.into()),
        };
        if let Err(e) = self.authenticate().await {
            return report.fatal(e);
        }
        let mut report = report;

        let window = Window::days(now, job.days);
        let mut selected: Vec<FeedItem> = Vec::new();
        let mut chosen: HashSet<String> = HashSet::new();

        for (url, fetched) in job.feeds.iter().zip(self.fetch_all(&job.feeds).await) {
            let feed = match fetched {
                Ok(feed) => feed,
                Err(e) => {
                    report.push_error(e.into());
                    continue;
                }
            };

            // Another feed may already have picked the same URL this run
            let pick = eligible_recent(&feed.items, &ledger, window)
                .into_iter()
                .find(|item| !chosen.contains(&item.url));

            match pick {
                Some(item) => {
                    debug!(feed = %url, item = %item.url, "selected");
                    chosen.insert(item.url.clone());
                    selected.push(item.clone());
                }
                None => report.push(StatusLine::ok(NO_ITEM)),
            }
        }

        for (item, post) in self.publish_selected(&selected, &mut report).await {
            ledger.record_publish(&item, post.url);
        }

        self.persist_ledger(&mut ledger, &job.ledger, &mut report);
        report
    }

    /// Merge the feeds into the ledger and republish a least syndicated entry
    pub async fn run_photos(&mut self, job: &PhotosJob, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::default();

        let mut stamp = match RunTimestamp::load(&job.timestamp) {
            Ok(stamp) => stamp,
            Err(e) => return report.fatal(e.into()),
        };
        if stamp.is_too_soon(now, job.min_interval) {
            info!(
                last = stamp.timestamp,
                min_interval = %humantime::format_duration(job.min_interval),
                "last publish is too recent"
            );
            report.push(StatusLine::ok(TOO_SOON));
            return report;
        }

        if let Err(e) = Self::require_feeds(&job.feeds) {
            return report.fatal(e);
        }
        let mut ledger = match Ledger::load(&job.ledger) {
            Ok(ledger) => ledger,
            Err(e) => return report.fatal(e.into()),
        };
        if let Err(e) = self.authenticate().await {
            return report.fatal(e);
        }

        let mut merged_feeds = 0usize;
        for fetched in self.fetch_all(&job.feeds).await {
            match fetched {
                Ok(feed) => {
                    merged_feeds += 1;
                    if merge_items(&mut ledger, feed.items) {
                        debug!(entries = ledger.len(), "ledger refreshed from feed");
                    }
                }
                Err(e) => report.push_error(e.into()),
            }
        }

        // Nothing fresh to rely on, so nothing is republished
        if merged_feeds > 0 {
            let mut rng = match job.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let pick = select_least_syndicated(&ledger, &mut rng).map(|entry| entry.item.clone());

            match pick {
                None => report.push(StatusLine::ok(NO_ITEM)),
                Some(item) => match self.publish(&item).await {
                    Ok(Some(post)) => {
                        report.push(self.posted_line(&item, &post));
                        ledger.record_publish(&item, post.url.clone());
                        stamp.touch(now);
                        report.published.push(post);
                    }
                    Ok(None) => report.push(self.dry_run_line(&item)),
                    Err(e) => report.push_error(e),
                },
            }
        }

        self.persist_ledger(&mut ledger, &job.ledger, &mut report);
        if !self.settings.dry_run {
            if let Err(e) = stamp.persist(&job.timestamp) {
                report.push_error(e.into());
            }
        }
        report
    }

    /// Publish the oldest recent item of each feed not yet found on the network
    pub async fn run_check(&mut self, job: &CheckJob, now: DateTime<Utc>) -> RunReport {
        let report = RunReport::default();
        if let Err(e) = Self::require_feeds(&job.feeds) {
            return report.fatal(e);
        }
        if let Err(e) = self.authenticate().await {
            return report.fatal(e);
        }
        let mut report = report;

        let window = Window::days(now, job.days);
        let fetched = self.fetch_all(&job.feeds).await;
        let mut selected: Vec<FeedItem> = Vec::new();

        {
            let mut check = RemoteCheck::new(
                job.method,
                self.publisher.as_ref(),
                window,
                job.application.clone(),
            );

            'feeds: for (url, fetched) in job.feeds.iter().zip(fetched) {
                let feed = match fetched {
                    Ok(feed) => feed,
                    Err(e) => {
                        report.push_error(e.into());
                        continue;
                    }
                };

                for item in window_candidates(&feed.items, window) {
                    if selected.iter().any(|s| s.url == item.url) {
                        continue;
                    }
                    debug!(feed = %url, item = %item.url, "checking for an earlier status");
                    match check.already_posted(&item.url).await {
                        Ok(true) => continue,
                        Ok(false) => {
                            selected.push(item.clone());
                            continue 'feeds;
                        }
                        Err(e) => {
                            report.push_error(e);
                            continue 'feeds;
                        }
                    }
                }
                report.push(StatusLine::ok(NO_ITEM));
            }
        }

        self.publish_selected(&selected, &mut report).await;
        report
    }
}
