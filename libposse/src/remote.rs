//! Remote duplicate check
//!
//! Without a local ledger, "already posted" is reconstructed from the
//! network itself, either by searching the account's statuses for the
//! candidate URL or by walking the account timeline back to the edge of the
//! lookback window.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::platforms::Publisher;
use crate::selector::Window;
use crate::types::TimelinePost;

/// How the remote check finds earlier statuses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteCheckMethod {
    /// Ask the network's search for the URL
    #[default]
    Search,
    /// Page through the account's own statuses
    Timeline,
}

impl std::str::FromStr for RemoteCheckMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "search" => Ok(RemoteCheckMethod::Search),
            "timeline" => Ok(RemoteCheckMethod::Timeline),
            _ => Err(format!(
                "Invalid check method: '{}'. Valid options: search, timeline",
                s
            )),
        }
    }
}

impl std::fmt::Display for RemoteCheckMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteCheckMethod::Search => write!(f, "search"),
            RemoteCheckMethod::Timeline => write!(f, "timeline"),
        }
    }
}

/// Lazily fetched account timeline, bounded by a window
///
/// Pages are fetched only when a lookup needs them and are kept, so later
/// lookups scan the cache before asking for more. Paging stops at the end of
/// the timeline or once a page reaches past the start of the window.
pub struct RemoteHistory<'a> {
    publisher: &'a dyn Publisher,
    window: Window,
    application: Option<String>,
    posts: Vec<TimelinePost>,
    cursor: Option<String>,
    pages_fetched: usize,
    exhausted: bool,
}

impl<'a> RemoteHistory<'a> {
    /// `application` restricts matches to statuses created by that client
    pub fn new(publisher: &'a dyn Publisher, window: Window, application: Option<String>) -> Self {
        Self {
            publisher,
            window,
            application,
            posts: Vec::new(),
            cursor: None,
            pages_fetched: 0,
            exhausted: false,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn matches(&self, post: &TimelinePost, url: &str) -> bool {
        if post.link.as_deref() != Some(url) {
            return false;
        }
        match &self.application {
            Some(app) => post.application.as_deref() == Some(app.as_str()),
            None => true,
        }
    }

    fn find_cached(&self, url: &str) -> Option<&TimelinePost> {
        self.posts.iter().find(|post| self.matches(post, url))
    }

    /// Fetch one more page; returns the index of its first post in the cache
    async fn fetch_page(&mut self) -> Result<usize> {
        let page = self.publisher.timeline_page(self.cursor.as_deref()).await?;
        self.pages_fetched += 1;

        let reached_window_start = page
            .posts
            .iter()
            .map(|post| post.created_at)
            .min()
            .map(|oldest| !self.window.contains(oldest))
            .unwrap_or(true);

        debug!(
            page = self.pages_fetched,
            posts = page.posts.len(),
            reached_window_start,
            "timeline page fetched"
        );

        self.exhausted = reached_window_start || page.next_cursor.is_none();
        self.cursor = page.next_cursor;

        let start = self.posts.len();
        self.posts.extend(page.posts);
        Ok(start)
    }

    /// The earliest status found linking to `url`, fetching pages as needed
    pub async fn find(&mut self, url: &str) -> Result<Option<TimelinePost>> {
        if let Some(post) = self.find_cached(url) {
            return Ok(Some(post.clone()));
        }

        while !self.exhausted {
            let start = self.fetch_page().await?;
            if let Some(post) = self.posts[start..].iter().find(|p| self.matches(p, url)) {
                return Ok(Some(post.clone()));
            }
        }
        Ok(None)
    }
}

/// Per-run remote duplicate check
pub enum RemoteCheck<'a> {
    Search(&'a dyn Publisher),
    Timeline(RemoteHistory<'a>),
}

impl<'a> RemoteCheck<'a> {
    pub fn new(
        method: RemoteCheckMethod,
        publisher: &'a dyn Publisher,
        window: Window,
        application: Option<String>,
    ) -> Self {
        match method {
            RemoteCheckMethod::Search => RemoteCheck::Search(publisher),
            RemoteCheckMethod::Timeline => {
                RemoteCheck::Timeline(RemoteHistory::new(publisher, window, application))
            }
        }
    }

    /// Whether a status for `url` already exists on the network
    pub async fn already_posted(&mut self, url: &str) -> Result<bool> {
        let found = match self {
            RemoteCheck::Search(publisher) => {
                publisher.search_posts(url).await?.into_iter().next()
            }
            RemoteCheck::Timeline(history) => history.find(url).await?,
        };

        match found {
            Some(post) => {
                info!(
                    url,
                    status = post.url.as_deref().unwrap_or(post.id.as_str()),
                    "Already posted"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
