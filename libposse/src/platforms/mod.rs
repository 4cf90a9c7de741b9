//! Publisher abstraction and network implementations
//!
//! Each network handles authentication, media upload and status creation
//! behind the [`Publisher`] trait, plus the read primitives the remote
//! duplicate check needs.
//!
//! # Examples
//!
//! ```no_run
//! use libposse::platforms::{mastodon::MastodonPublisher, Publisher};
//! use libposse::types::NewPost;
//!
//! # async fn example() -> libposse::Result<()> {
//! let mut publisher = MastodonPublisher::new(
//!     "https://mastodon.social".to_string(),
//!     "access-token".to_string(),
//! )?;
//! publisher.authenticate().await?;
//!
//! let published = publisher.create_post(&NewPost::new("Hello!")).await?;
//! println!("{}", published.url);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{PlatformError, Result};
use crate::types::{NewPost, PublishedPost, TimelinePage, TimelinePost};

pub mod mastodon;
pub mod twitter;

// Available in all builds so integration tests can use it
pub mod mock;

/// Target network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    #[default]
    Mastodon,
    Twitter,
}

impl std::str::FromStr for PlatformKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mastodon" => Ok(PlatformKind::Mastodon),
            "twitter" | "x" => Ok(PlatformKind::Twitter),
            _ => Err(format!(
                "Invalid platform: '{}'. Valid options: mastodon, twitter",
                s
            )),
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformKind::Mastodon => write!(f, "mastodon"),
            PlatformKind::Twitter => write!(f, "twitter"),
        }
    }
}

/// Uniform contract over a social network
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Verify the credentials; a failure here aborts the run
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Authentication` when the network rejects the
    /// credentials or cannot be reached to check them.
    async fn authenticate(&mut self) -> Result<()>;

    /// Upload a local file with its description, returning the media id
    async fn upload_media(&self, file: &Path, description: &str) -> Result<String>;

    /// Create a status
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Posting`, `Validation`, `RateLimit` or
    /// `Network` depending on what the network answered.
    async fn create_post(&self, post: &NewPost) -> Result<PublishedPost>;

    /// One page of the account's own statuses, newest first
    ///
    /// `cursor` is the `next_cursor` of the previous page, `None` for the
    /// newest page.
    async fn timeline_page(&self, _cursor: Option<&str>) -> Result<TimelinePage> {
        Err(PlatformError::NotSupported(format!(
            "{} has no timeline paging",
            self.name()
        ))
        .into())
    }

    /// The account's statuses that mention `url`
    async fn search_posts(&self, _url: &str) -> Result<Vec<TimelinePost>> {
        Err(PlatformError::NotSupported(format!("{} has no status search", self.name())).into())
    }

    /// Lowercase network identifier ("mastodon", "twitter")
    fn name(&self) -> &str;

    /// Maximum status length in characters, `None` when unlimited
    fn character_limit(&self) -> Option<usize>;

    /// Base URL of the server statuses are published on, when there is one
    fn instance_url(&self) -> Option<&str> {
        None
    }

    /// Maximum number of media attached to one status
    fn max_attachments(&self) -> usize {
        4
    }

    /// Check a status text before it is sent
    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        if let Some(limit) = self.character_limit() {
            let count = content.chars().count();
            if count > limit {
                return Err(PlatformError::Validation(format!(
                    "Content exceeds {}'s {} character limit (current: {} characters)",
                    self.name(),
                    limit,
                    count
                ))
                .into());
            }
        }

        Ok(())
    }
}

/// Build the publisher for `kind` from configuration
///
/// # Errors
///
/// Returns a configuration error when the instance URL or an access token
/// is missing.
pub fn create_publisher(kind: PlatformKind, config: &Config) -> Result<Box<dyn Publisher>> {
    match kind {
        PlatformKind::Mastodon => Ok(Box::new(mastodon::MastodonPublisher::from_config(
            &config.mastodon,
            &config.http,
        )?)),
        PlatformKind::Twitter => Ok(Box::new(twitter::TwitterPublisher::from_config(
            &config.twitter,
            &config.http,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockPublisher;
    use super::*;

    #[test]
    fn test_platform_kind_from_str() {
        assert_eq!("mastodon".parse::<PlatformKind>().unwrap(), PlatformKind::Mastodon);
        assert_eq!("Twitter".parse::<PlatformKind>().unwrap(), PlatformKind::Twitter);
        assert_eq!("x".parse::<PlatformKind>().unwrap(), PlatformKind::Twitter);
        assert!("nostr".parse::<PlatformKind>().is_err());
    }

    #[test]
    fn test_default_validation() {
        let publisher = MockPublisher::with_limit("mock", 10);
        assert!(publisher.validate_content("short").is_ok());
        assert!(publisher.validate_content("   ").is_err());

        let err = publisher.validate_content("much too long").unwrap_err();
        assert!(err.to_string().contains("10 character limit"));
    }

    #[test]
    fn test_create_publisher_requires_token() {
        let mut config = Config::default();
        config.mastodon.instance = Some("mastodon.social".to_string());
        assert!(create_publisher(PlatformKind::Mastodon, &config).is_err());
        assert!(create_publisher(PlatformKind::Twitter, &config).is_err());
    }
}
