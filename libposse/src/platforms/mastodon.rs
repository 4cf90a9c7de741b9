//! Mastodon publisher
//!
//! Talks to Mastodon (and API-compatible servers) through the megalodon
//! library.

use std::path::Path;

use async_trait::async_trait;
use megalodon::entities::{StatusVisibility, UploadMedia};
use megalodon::megalodon::{
    GetAccountStatusesInputOptions, PostStatusInputOptions, PostStatusOutput, SearchInputOptions,
    SearchType, UploadMediaInputOptions,
};
use megalodon::{Megalodon, SNS};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::{HttpConfig, MastodonConfig};
use crate::error::{PlatformError, Result};
use crate::platforms::Publisher;
use crate::types::{NewPost, PublishedPost, TimelinePage, TimelinePost, Visibility};

/// Statuses requested per timeline page (the API maximum)
const PAGE_SIZE: u32 = 40;

const DEFAULT_CHARACTER_LIMIT: usize = 500;

pub struct MastodonPublisher {
    client: Box<dyn Megalodon + Send + Sync>,

    /// The instance URL (e.g., "https://mastodon.social")
    instance_url: String,

    /// Account whose statuses are searched and paged; learned on
    /// authentication when not configured
    account_id: Option<String>,

    /// Instance-specific, refreshed on authentication
    character_limit: usize,
}

impl MastodonPublisher {
    /// Create a publisher for `instance_url` with the default 500 character limit
    pub fn new(instance_url: String, access_token: String) -> Result<Self> {
        Self::with_user_agent(instance_url, access_token, None)
    }

    fn with_user_agent(
        instance_url: String,
        access_token: String,
        user_agent: Option<String>,
    ) -> Result<Self> {
        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(access_token),
            user_agent,
        )
        .map_err(|e| {
            PlatformError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        Ok(Self {
            client,
            instance_url,
            account_id: None,
            character_limit: DEFAULT_CHARACTER_LIMIT,
        })
    }

    /// Create a publisher from the `[mastodon]` section and the environment
    pub fn from_config(config: &MastodonConfig, http: &HttpConfig) -> Result<Self> {
        let instance_url = config.instance_url()?;
        let token = config.access_token()?.expose_secret().to_string();

        let mut publisher =
            Self::with_user_agent(instance_url, token, Some(http.user_agent.clone()))?;
        publisher.account_id = config.account_id.clone();
        Ok(publisher)
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    fn require_account_id(&self) -> Result<String> {
        self.account_id.clone().ok_or_else(|| {
            PlatformError::Authentication(
                "Mastodon account id unknown; set MASTODON_ACCOUNT_ID or authenticate first"
                    .to_string(),
            )
            .into()
        })
    }

    async fn fetch_instance_info(&mut self) -> Result<()> {
        let response = self
            .client
            .get_instance()
            .await
            .map_err(|e| map_megalodon_error(e, "fetch instance info"))?;

        let limit = response.json.configuration.statuses.max_characters;
        self.character_limit = limit as usize;
        Ok(())
    }
}

#[async_trait]
impl Publisher for MastodonPublisher {
    async fn authenticate(&mut self) -> Result<()> {
        let account = self
            .client
            .verify_account_credentials()
            .await
            .map_err(|e| map_megalodon_error(e, "authenticate"))?;

        debug!(account = %account.json.acct, "Mastodon credentials verified");
        if self.account_id.is_none() {
            self.account_id = Some(account.json.id);
        }

        // Older servers do not expose the limit; keep the default then
        if let Err(e) = self.fetch_instance_info().await {
            debug!("could not read instance character limit: {}", e);
        }
        Ok(())
    }

    async fn upload_media(&self, file: &Path, description: &str) -> Result<String> {
        let options = UploadMediaInputOptions {
            description: Some(description.to_string()).filter(|d| !d.is_empty()),
            ..Default::default()
        };

        let response = self
            .client
            .upload_media(file.to_string_lossy().to_string(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "upload media"))?;

        let media_id = match response.json {
            UploadMedia::Attachment(attachment) => attachment.id,
            UploadMedia::AsyncAttachment(attachment) => attachment.id,
        };
        debug!(media_id = %media_id, "uploaded to Mastodon");
        Ok(media_id)
    }

    async fn create_post(&self, post: &NewPost) -> Result<PublishedPost> {
        self.validate_content(&post.text)?;

        let options = PostStatusInputOptions {
            media_ids: Some(post.media_ids.clone()).filter(|ids| !ids.is_empty()),
            visibility: Some(status_visibility(post.visibility)),
            language: post.language.clone(),
            ..Default::default()
        };

        let response = self
            .client
            .post_status(post.text.clone(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        match response.json {
            PostStatusOutput::Status(status) => {
                let url = status.url.unwrap_or(status.uri);
                info!(id = %status.id, url = %url, "status created");
                Ok(PublishedPost { id: status.id, url })
            }
            PostStatusOutput::ScheduledStatus(scheduled) => Err(PlatformError::Posting(format!(
                "Mastodon scheduled status {} instead of publishing it",
                scheduled.id
            ))
            .into()),
        }
    }

    async fn timeline_page(&self, cursor: Option<&str>) -> Result<TimelinePage> {
        let options = GetAccountStatusesInputOptions {
            limit: Some(PAGE_SIZE),
            max_id: cursor.map(str::to_string),
            exclude_reblogs: Some(true),
            ..Default::default()
        };

        let response = self
            .client
            .get_account_statuses(self.require_account_id()?, Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "list statuses"))?;

        let posts: Vec<TimelinePost> = response.json.into_iter().map(timeline_post).collect();
        let next_cursor = posts.last().map(|post| post.id.clone());
        Ok(TimelinePage { posts, next_cursor })
    }

    async fn search_posts(&self, url: &str) -> Result<Vec<TimelinePost>> {
        let options = SearchInputOptions {
            r#type: Some(SearchType::Statuses),
            account_id: Some(self.require_account_id()?),
            ..Default::default()
        };

        let response = self
            .client
            .search(url.to_string(), Some(&options))
            .await
            .map_err(|e| map_megalodon_error(e, "search statuses"))?;

        Ok(response
            .json
            .statuses
            .into_iter()
            .map(timeline_post)
            .collect())
    }

    fn name(&self) -> &str {
        "mastodon"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(self.character_limit)
    }

    fn instance_url(&self) -> Option<&str> {
        Some(&self.instance_url)
    }
}

fn status_visibility(visibility: Visibility) -> StatusVisibility {
    match visibility {
        Visibility::Public => StatusVisibility::Public,
        Visibility::Unlisted => StatusVisibility::Unlisted,
        Visibility::Private => StatusVisibility::Private,
        Visibility::Direct => StatusVisibility::Direct,
    }
}

fn timeline_post(status: megalodon::entities::Status) -> TimelinePost {
    TimelinePost {
        id: status.id,
        url: status.url.or(Some(status.uri)),
        created_at: status.created_at,
        link: status.card.map(|card| card.url),
        application: status.application.map(|app| app.name),
    }
}

/// Map megalodon errors to PlatformError
///
/// - HTTP 401/403 → `Authentication`
/// - HTTP 422 → `Validation`
/// - HTTP 429 → `RateLimit`
/// - HTTP 5xx and connection problems → `Network`
/// - unreadable responses → `Posting`
fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let error_str = error.to_string();
    let error_lower = error_str.to_lowercase();

    match extract_http_status(&error_str) {
        Some(401) | Some(403) => PlatformError::Authentication(format!(
            "Mastodon authentication failed ({}): {}. \
                Suggestion: Verify MASTODON_ACCESS_TOKEN is valid and has the write scope.",
            context, error_str
        )),
        Some(422) => PlatformError::Validation(format!(
            "Mastodon validation failed ({}): {}",
            context, error_str
        )),
        Some(429) => PlatformError::RateLimit(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, error_str
        )),
        Some(500..=599) => PlatformError::Network(format!(
            "Mastodon server error ({}): {}",
            context, error_str
        )),
        Some(_) => {
            PlatformError::Posting(format!("Mastodon HTTP error ({}): {}", context, error_str))
        }
        None if error_lower.contains("unauthorized") || error_lower.contains("forbidden") => {
            PlatformError::Authentication(format!(
                "Mastodon authentication failed ({}): {}",
                context, error_str
            ))
        }
        None if error_lower.contains("parse")
            || error_lower.contains("json")
            || error_lower.contains("deserialize") =>
        {
            PlatformError::Posting(format!(
                "Mastodon response parse error ({}): {}",
                context, error_str
            ))
        }
        None => PlatformError::Network(format!(
            "Mastodon error ({}): {}. \
                Suggestion: Check your network connection and instance availability.",
            context, error_str
        )),
    }
}

/// Extract an HTTP status code from an error message
///
/// Looks for "HTTP 401", "status 403", "code: 422" and bare "429:" forms.
fn extract_http_status(error_str: &str) -> Option<u16> {
    let valid = |code: u16| (100..=599).contains(&code).then_some(code);

    for prefix in ["HTTP ", "status ", "code: ", "status_code: "] {
        if let Some(pos) = error_str.find(prefix) {
            let code = error_str[pos + prefix.len()..]
                .get(0..3)
                .and_then(|s| s.parse::<u16>().ok())
                .and_then(valid);
            if code.is_some() {
                return code;
            }
        }
    }

    let bytes = error_str.as_bytes();
    bytes.windows(4).enumerate().find_map(|(i, window)| {
        let standalone = i == 0 || !bytes[i - 1].is_ascii_digit();
        let digits = window[..3].iter().all(u8::is_ascii_digit);
        if standalone && digits && (window[3] == b':' || window[3] == b' ') {
            std::str::from_utf8(&window[..3])
                .ok()
                .and_then(|s| s.parse::<u16>().ok())
                .and_then(valid)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NewPost;

    fn publisher() -> MastodonPublisher {
        MastodonPublisher::new("https://mastodon.social".to_string(), "test-token".to_string())
            .expect("Failed to create publisher")
    }

    #[test]
    fn test_publisher_creation() {
        let publisher = publisher();
        assert_eq!(publisher.name(), "mastodon");
        assert_eq!(publisher.character_limit(), Some(500));
        assert_eq!(publisher.instance_url(), Some("https://mastodon.social"));
        assert!(publisher.account_id().is_none());
    }

    #[test]
    fn test_from_config_reads_account_and_token() {
        let mut config = crate::config::Config::default();
        config.apply_env_from(|key| match key {
            "MASTODON_INSTANCE" => Some("mamot.fr".to_string()),
            "MASTODON_ACCESS_TOKEN" => Some("token".to_string()),
            "MASTODON_ACCOUNT_ID" => Some("000262395".to_string()),
            _ => None,
        });

        let publisher = MastodonPublisher::from_config(&config.mastodon, &config.http).unwrap();
        assert_eq!(publisher.instance_url(), Some("https://mamot.fr"));
        assert_eq!(publisher.account_id(), Some("000262395"));
    }

    #[test]
    fn test_from_config_without_token_fails() {
        let config = MastodonConfig {
            instance: Some("mamot.fr".to_string()),
            ..Default::default()
        };
        let result = MastodonPublisher::from_config(&config, &HttpConfig::default());
        assert!(matches!(
            result,
            Err(crate::error::PosseError::Config(
                crate::error::ConfigError::MissingField(_)
            ))
        ));
    }

    #[test]
    fn test_validation_boundary() {
        let publisher = publisher();
        assert!(publisher.validate_content(&"a".repeat(500)).is_ok());
        assert!(publisher.validate_content(&"a".repeat(501)).is_err());
        assert!(publisher.validate_content(&"🦀".repeat(500)).is_ok());
        assert!(publisher.validate_content(" \n\t").is_err());
    }

    #[tokio::test]
    async fn test_create_post_validates_before_sending() {
        let publisher = publisher();
        let result = publisher.create_post(&NewPost::new("a".repeat(600))).await;
        match result {
            Err(crate::error::PosseError::Platform(PlatformError::Validation(msg))) => {
                assert!(msg.contains("500"));
                assert!(msg.contains("600"));
            }
            other => panic!("Expected validation error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_timeline_requires_account_id() {
        let publisher = publisher();
        let result = publisher.timeline_page(None).await;
        assert!(matches!(
            result,
            Err(crate::error::PosseError::Platform(PlatformError::Authentication(_)))
        ));
    }

    #[test]
    fn test_status_visibility_mapping() {
        assert!(matches!(
            status_visibility(Visibility::Public),
            StatusVisibility::Public
        ));
        assert!(matches!(
            status_visibility(Visibility::Direct),
            StatusVisibility::Direct
        ));
    }

    #[test]
    fn test_extract_http_status_with_prefixes() {
        assert_eq!(extract_http_status("HTTP 401 Unauthorized"), Some(401));
        assert_eq!(extract_http_status("status 404 not found"), Some(404));
        assert_eq!(extract_http_status("code: 422"), Some(422));
        assert_eq!(extract_http_status("status_code: 429"), Some(429));
    }

    #[test]
    fn test_extract_http_status_standalone() {
        assert_eq!(extract_http_status("Error: 401: Unauthorized"), Some(401));
        assert_eq!(
            extract_http_status("Failed with 422: validation error"),
            Some(422)
        );
        assert_eq!(extract_http_status("id 12345: nope"), None);
    }

    #[test]
    fn test_extract_http_status_none() {
        assert_eq!(extract_http_status("Network error"), None);
        assert_eq!(extract_http_status("HTTP 999"), None);
        assert_eq!(extract_http_status("1234"), None);
    }
}
