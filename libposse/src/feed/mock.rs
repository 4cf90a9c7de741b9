//! Canned [`FeedSource`] for tests
//!
//! Available in all builds so integration tests and the binaries' tests can
//! drive a full run without network access.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::FeedSource;
use crate::error::FeedError;
use crate::types::Feed;

#[derive(Debug, Clone, Default)]
pub struct MockFeedSource {
    feeds: HashMap<String, Result<Feed, FeedError>>,
    files: HashMap<String, Vec<u8>>,
    fetched: Arc<Mutex<Vec<String>>>,
    downloaded: Arc<Mutex<Vec<String>>>,
}

impl MockFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: &str, feed: Feed) -> Self {
        self.feeds.insert(url.to_string(), Ok(feed));
        self
    }

    pub fn with_failing_feed(mut self, url: &str, message: &str) -> Self {
        self.feeds.insert(
            url.to_string(),
            Err(FeedError::Request {
                url: url.to_string(),
                message: message.to_string(),
            }),
        );
        self
    }

    pub fn with_file(mut self, url: &str, content: &[u8]) -> Self {
        self.files.insert(url.to_string(), content.to_vec());
        self
    }

    /// Feed URLs requested so far, in call order
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// File URLs requested so far, in call order
    pub fn downloaded(&self) -> Vec<String> {
        self.downloaded.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FeedSource for MockFeedSource {
    async fn fetch_feed(&self, url: &str) -> Result<Feed, FeedError> {
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(url.to_string());
        }

        self.feeds.get(url).cloned().unwrap_or_else(|| {
            Err(FeedError::Status {
                url: url.to_string(),
                status: 404,
            })
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, FeedError> {
        if let Ok(mut downloaded) = self.downloaded.lock() {
            downloaded.push(url.to_string());
        }

        let content = self.files.get(url).ok_or_else(|| FeedError::Status {
            url: url.to_string(),
            status: 404,
        })?;

        tokio::fs::write(dest, content)
            .await
            .map_err(|e| FeedError::Download {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(content.len() as u64)
    }
}
