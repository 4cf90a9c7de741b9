//! Mock publisher for testing
//!
//! Simulates authentication, media upload and posting outcomes and records
//! every call, so runs can be exercised without credentials or network
//! access.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::{PlatformError, Result};
use crate::platforms::Publisher;
use crate::types::{NewPost, PublishedPost, TimelinePage, TimelinePost};

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Publisher name (e.g. "mock-mastodon")
    pub name: String,

    pub auth_succeeds: bool,
    pub auth_error: Option<String>,

    pub post_succeeds: bool,
    pub post_error: Option<String>,

    /// Media descriptions whose upload fails
    pub failing_uploads: Vec<String>,

    /// Delay before completing operations
    pub delay: Duration,

    pub character_limit: Option<usize>,
    pub max_attachments: usize,
    pub instance_url: Option<String>,

    /// Timeline pages served in order; `None` means timeline unsupported
    pub timeline: Option<Vec<Vec<TimelinePost>>>,

    /// Search results; `None` means search unsupported
    pub search_results: Option<Vec<TimelinePost>>,

    pub auth_call_count: Arc<Mutex<usize>>,
    pub timeline_call_count: Arc<Mutex<usize>>,
    pub search_call_count: Arc<Mutex<usize>>,

    /// Files and descriptions passed to `upload_media`
    pub uploads: Arc<Mutex<Vec<(PathBuf, String)>>>,

    /// Posts that were accepted
    pub posts: Arc<Mutex<Vec<NewPost>>>,

    /// Every post attempt, accepted or not
    pub post_attempts: Arc<Mutex<Vec<NewPost>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            auth_succeeds: true,
            auth_error: None,
            post_succeeds: true,
            post_error: None,
            failing_uploads: Vec::new(),
            delay: Duration::from_millis(0),
            character_limit: None,
            max_attachments: 4,
            instance_url: None,
            timeline: None,
            search_results: None,
            auth_call_count: Arc::new(Mutex::new(0)),
            timeline_call_count: Arc::new(Mutex::new(0)),
            search_call_count: Arc::new(Mutex::new(0)),
            uploads: Arc::new(Mutex::new(Vec::new())),
            posts: Arc::new(Mutex::new(Vec::new())),
            post_attempts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock publisher for testing
///
/// Cloning shares the recorded calls, so a test can keep a handle while the
/// run owns the boxed publisher.
#[derive(Debug, Clone)]
pub struct MockPublisher {
    config: MockConfig,
    authenticated: bool,
}

fn bump(counter: &Mutex<usize>) {
    if let Ok(mut count) = counter.lock() {
        *count += 1;
    }
}

fn read<T: Clone>(shared: &Mutex<T>) -> Option<T> {
    shared.lock().ok().map(|value| value.clone())
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            authenticated: false,
        }
    }

    /// A publisher that accepts everything
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// A publisher whose credentials are rejected
    pub fn auth_failure(name: &str, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            auth_succeeds: false,
            auth_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    /// A publisher that refuses every status
    pub fn post_failure(name: &str, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            post_succeeds: false,
            post_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    pub fn with_limit(name: &str, limit: usize) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            character_limit: Some(limit),
            ..Default::default()
        })
    }

    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    /// Make uploads described as `description` fail
    pub fn failing_upload(mut self, description: &str) -> Self {
        self.config.failing_uploads.push(description.to_string());
        self
    }

    pub fn max_attachments(mut self, max: usize) -> Self {
        self.config.max_attachments = max;
        self
    }

    pub fn instance(mut self, url: &str) -> Self {
        self.config.instance_url = Some(url.to_string());
        self
    }

    /// Serve these timeline pages, newest first
    pub fn timeline(mut self, pages: Vec<Vec<TimelinePost>>) -> Self {
        self.config.timeline = Some(pages);
        self
    }

    pub fn search_results(mut self, posts: Vec<TimelinePost>) -> Self {
        self.config.search_results = Some(posts);
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn auth_call_count(&self) -> usize {
        read(&self.config.auth_call_count).unwrap_or_default()
    }

    pub fn timeline_call_count(&self) -> usize {
        read(&self.config.timeline_call_count).unwrap_or_default()
    }

    pub fn search_call_count(&self) -> usize {
        read(&self.config.search_call_count).unwrap_or_default()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        read(&self.config.uploads).unwrap_or_default()
    }

    /// Posts that were accepted
    pub fn posts(&self) -> Vec<NewPost> {
        read(&self.config.posts).unwrap_or_default()
    }

    pub fn post_attempts(&self) -> Vec<NewPost> {
        read(&self.config.post_attempts).unwrap_or_default()
    }

    async fn simulate_latency(&self) {
        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn authenticate(&mut self) -> Result<()> {
        bump(&self.config.auth_call_count);
        self.simulate_latency().await;

        if self.config.auth_succeeds {
            self.authenticated = true;
            Ok(())
        } else {
            let message = self
                .config
                .auth_error
                .clone()
                .unwrap_or_else(|| "Mock authentication failed".to_string());
            Err(PlatformError::Authentication(message).into())
        }
    }

    async fn upload_media(&self, file: &Path, description: &str) -> Result<String> {
        self.simulate_latency().await;

        if !file.exists() {
            return Err(
                PlatformError::Media(format!("{} does not exist", file.display())).into(),
            );
        }
        if self.config.failing_uploads.iter().any(|d| d == description) {
            return Err(PlatformError::Media(format!("Mock upload of '{}' failed", description))
                .into());
        }

        let id = match self.config.uploads.lock() {
            Ok(mut uploads) => {
                uploads.push((file.to_path_buf(), description.to_string()));
                uploads.len()
            }
            Err(_) => 0,
        };
        Ok(format!("media-{}", id))
    }

    async fn create_post(&self, post: &NewPost) -> Result<PublishedPost> {
        if let Ok(mut attempts) = self.config.post_attempts.lock() {
            attempts.push(post.clone());
        }
        self.simulate_latency().await;

        self.validate_content(&post.text)?;

        if !self.config.post_succeeds {
            let message = self
                .config
                .post_error
                .clone()
                .unwrap_or_else(|| "Mock posting failed".to_string());
            return Err(PlatformError::Posting(message).into());
        }

        let id = match self.config.posts.lock() {
            Ok(mut posts) => {
                posts.push(post.clone());
                posts.len()
            }
            Err(_) => 0,
        };
        let base = self
            .config
            .instance_url
            .clone()
            .unwrap_or_else(|| format!("https://{}.example", self.config.name));

        Ok(PublishedPost {
            id: id.to_string(),
            url: format!("{}/@me/{}", base, id),
        })
    }

    async fn timeline_page(&self, cursor: Option<&str>) -> Result<TimelinePage> {
        bump(&self.config.timeline_call_count);
        let pages = self.config.timeline.as_ref().ok_or_else(|| {
            PlatformError::NotSupported(format!("{} has no timeline paging", self.config.name))
        })?;

        // The cursor is the index of the page to serve
        let index = match cursor {
            None => 0,
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                PlatformError::Validation(format!("invalid timeline cursor '{}'", raw))
            })?,
        };

        let posts = pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < pages.len()).then(|| (index + 1).to_string());
        Ok(TimelinePage { posts, next_cursor })
    }

    async fn search_posts(&self, url: &str) -> Result<Vec<TimelinePost>> {
        bump(&self.config.search_call_count);
        let results = self.config.search_results.as_ref().ok_or_else(|| {
            PlatformError::NotSupported(format!("{} has no status search", self.config.name))
        })?;

        Ok(results
            .iter()
            .filter(|post| post.link.as_deref() == Some(url))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn character_limit(&self) -> Option<usize> {
        self.config.character_limit
    }

    fn instance_url(&self) -> Option<&str> {
        self.config.instance_url.as_deref()
    }

    fn max_attachments(&self) -> usize {
        self.config.max_attachments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn post_linking(id: &str, link: &str) -> TimelinePost {
        TimelinePost {
            id: id.to_string(),
            url: None,
            created_at: Utc::now(),
            link: Some(link.to_string()),
            application: None,
        }
    }

    #[tokio::test]
    async fn test_success_records_posts() {
        let mut publisher = MockPublisher::success("mock-mastodon");
        let handle = publisher.clone();

        publisher.authenticate().await.unwrap();
        let published = publisher.create_post(&NewPost::new("Hello")).await.unwrap();

        assert!(publisher.is_authenticated());
        assert_eq!(handle.auth_call_count(), 1);
        assert_eq!(handle.posts().len(), 1);
        assert_eq!(published.url, "https://mock-mastodon.example/@me/1");
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let mut publisher = MockPublisher::auth_failure("mock", "Invalid credentials");
        let err = publisher.authenticate().await.unwrap_err();
        assert!(err.to_string().contains("Invalid credentials"));
        assert!(!publisher.is_authenticated());
    }

    #[tokio::test]
    async fn test_post_failure_is_recorded_as_attempt() {
        let publisher = MockPublisher::post_failure("mock", "Server down");
        assert!(publisher.create_post(&NewPost::new("Hi")).await.is_err());
        assert_eq!(publisher.post_attempts().len(), 1);
        assert!(publisher.posts().is_empty());
    }

    #[tokio::test]
    async fn test_failing_upload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("image");
        std::fs::write(&file, b"png").unwrap();

        let publisher = MockPublisher::success("mock").failing_upload("broken");
        assert_eq!(publisher.upload_media(&file, "fine").await.unwrap(), "media-1");
        assert!(publisher.upload_media(&file, "broken").await.is_err());
        assert!(publisher
            .upload_media(&dir.path().join("missing"), "fine")
            .await
            .is_err());
        assert_eq!(publisher.uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_timeline_pages() {
        let publisher = MockPublisher::success("mock").timeline(vec![
            vec![post_linking("2", "https://example.com/b/")],
            vec![post_linking("1", "https://example.com/a/")],
        ]);

        let first = publisher.timeline_page(None).await.unwrap();
        assert_eq!(first.posts[0].id, "2");
        let second = publisher
            .timeline_page(first.next_cursor.as_deref())
            .await
            .unwrap();
        assert_eq!(second.posts[0].id, "1");
        assert!(second.next_cursor.is_none());
        assert_eq!(publisher.timeline_call_count(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_reads() {
        let publisher = MockPublisher::success("mock");
        assert!(publisher.timeline_page(None).await.is_err());
        assert!(publisher.search_posts("https://example.com/").await.is_err());
    }

    #[tokio::test]
    async fn test_search_filters_by_link() {
        let publisher = MockPublisher::success("mock")
            .search_results(vec![post_linking("1", "https://example.com/a/")]);
        assert_eq!(
            publisher.search_posts("https://example.com/a/").await.unwrap().len(),
            1
        );
        assert!(publisher
            .search_posts("https://example.com/b/")
            .await
            .unwrap()
            .is_empty());
    }
}
