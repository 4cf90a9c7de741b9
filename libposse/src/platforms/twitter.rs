//! Twitter (X) publisher
//!
//! Uses the v2 REST API with an OAuth 2.0 user-context access token.
//! Timeline paging is not offered; the remote check relies on recent
//! search instead.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::{HttpConfig, TwitterConfig};
use crate::error::{ConfigError, PlatformError, Result};
use crate::platforms::Publisher;
use crate::types::{NewPost, PublishedPost, TimelinePost};

const CHARACTER_LIMIT: usize = 280;

pub struct TwitterPublisher {
    http: reqwest::Client,
    token: SecretString,
    api_base: String,
    upload_base: String,
    /// Screen name used in search queries and status URLs; learned on
    /// authentication when not configured
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ApiError {
    fn describe(&self) -> String {
        [&self.title, &self.detail, &self.message]
            .into_iter()
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .join(": ")
    }
}

#[derive(Debug, Deserialize)]
struct User {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Media {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    entities: Option<Entities>,
}

#[derive(Debug, Deserialize)]
struct Entities {
    #[serde(default)]
    urls: Vec<UrlEntity>,
}

#[derive(Debug, Deserialize)]
struct UrlEntity {
    #[serde(default)]
    expanded_url: Option<String>,
}

impl TwitterPublisher {
    pub fn new(
        token: SecretString,
        username: Option<String>,
        config: &TwitterConfig,
        http: &HttpConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http.timeout)
            .user_agent(http.user_agent.as_str())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "http".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http: client,
            token,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            upload_base: config.upload_base.trim_end_matches('/').to_string(),
            username,
        })
    }

    pub fn from_config(config: &TwitterConfig, http: &HttpConfig) -> Result<Self> {
        let token = SecretString::from(config.access_token()?.expose_secret().to_string());
        Self::new(token, config.username.clone(), config, http)
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn status_url(&self, id: &str) -> String {
        format!(
            "https://twitter.com/{}/status/{}",
            self.username.as_deref().unwrap_or("user"),
            id
        )
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T> {
        self.send_optional(request, context).await?.ok_or_else(|| {
            PlatformError::Posting(format!("Twitter returned no data ({})", context)).into()
        })
    }

    /// Like `send`, but a response without `data` and without `errors` is `None`
    async fn send_optional<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<Option<T>> {
        let response = request
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                PlatformError::Network(format!("Twitter request failed ({}): {}", context, e))
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            PlatformError::Network(format!("Twitter response unreadable ({}): {}", context, e))
        })?;

        read_envelope(status, &body, context)
    }
}

/// Interpret a v2 response body
///
/// A successful status carrying `errors` but no `data` is a failure; only
/// a bare `{}`-like answer (no data, no errors) means "nothing".
fn read_envelope<T: for<'de> Deserialize<'de>>(
    status: u16,
    body: &str,
    context: &str,
) -> Result<Option<T>> {
    let envelope: Option<Envelope<T>> = serde_json::from_str(body).ok();
    let api_message = envelope
        .as_ref()
        .map(|e| {
            e.errors
                .iter()
                .map(ApiError::describe)
                .collect::<Vec<_>>()
                .join("; ")
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.chars().take(200).collect());

    if !(200..300).contains(&status) {
        return Err(map_status(status, context, &api_message).into());
    }

    match envelope {
        Some(Envelope { data: Some(data), .. }) => Ok(Some(data)),
        Some(Envelope { data: None, errors }) if errors.is_empty() => Ok(None),
        Some(_) => Err(PlatformError::Posting(format!(
            "Twitter returned errors ({}): {}",
            context, api_message
        ))
        .into()),
        None => Err(PlatformError::Posting(format!(
            "Twitter response unreadable ({}): {}",
            context, api_message
        ))
        .into()),
    }
}

#[async_trait]
impl Publisher for TwitterPublisher {
    async fn authenticate(&mut self) -> Result<()> {
        let request = self.http.get(format!("{}/2/users/me", self.api_base));
        let user: User = self.send(request, "authenticate").await.map_err(|e| match e {
            crate::error::PosseError::Platform(PlatformError::Authentication(m)) => {
                PlatformError::Authentication(m)
            }
            other => PlatformError::Authentication(format!("Twitter authentication failed: {}", other)),
        })?;

        debug!(username = %user.username, "Twitter credentials verified");
        if self.username.is_none() {
            self.username = Some(user.username);
        }
        Ok(())
    }

    async fn upload_media(&self, file: &Path, description: &str) -> Result<String> {
        let bytes = tokio::fs::read(file).await.map_err(|e| {
            PlatformError::Media(format!("cannot read {}: {}", file.display(), e))
        })?;

        let form = Form::new()
            .text("media_category", "tweet_image")
            .part("media", Part::bytes(bytes).file_name("image"));
        let request = self
            .http
            .post(format!("{}/2/media/upload", self.upload_base))
            .multipart(form);
        let media: Media = self.send(request, "upload media").await?;

        if !description.is_empty() {
            let request = self
                .http
                .post(format!("{}/2/media/metadata", self.upload_base))
                .json(&json!({
                    "id": media.id,
                    "metadata": { "alt_text": { "text": description } }
                }));
            // Alt text is best effort; the media itself is usable
            if let Err(e) = self.send::<serde_json::Value>(request, "media alt text").await {
                debug!(media_id = %media.id, "alt text not set: {}", e);
            }
        }

        Ok(media.id)
    }

    async fn create_post(&self, post: &NewPost) -> Result<PublishedPost> {
        self.validate_content(&post.text)?;

        let mut body = json!({ "text": post.text });
        if !post.media_ids.is_empty() {
            body["media"] = json!({ "media_ids": post.media_ids });
        }

        let request = self
            .http
            .post(format!("{}/2/tweets", self.api_base))
            .json(&body);
        let tweet: Tweet = self.send(request, "create tweet").await?;

        let url = self.status_url(&tweet.id);
        info!(id = %tweet.id, url = %url, "tweet created");
        Ok(PublishedPost { id: tweet.id, url })
    }

    async fn search_posts(&self, url: &str) -> Result<Vec<TimelinePost>> {
        let username = self.username.as_deref().ok_or_else(|| {
            PlatformError::Authentication(
                "Twitter username unknown; set TWITTER_USERNAME or authenticate first".to_string(),
            )
        })?;

        let query = format!("url:\"{}\" from:{}", url, username);
        let request = self
            .http
            .get(format!("{}/2/tweets/search/recent", self.api_base))
            .query(&[
                ("query", query.as_str()),
                ("tweet.fields", "created_at,entities"),
            ]);

        // An empty result comes back without a data field
        let tweets: Vec<Tweet> = self
            .send_optional(request, "search tweets")
            .await?
            .unwrap_or_default();

        Ok(tweets
            .into_iter()
            .map(|tweet| {
                let link = tweet
                    .entities
                    .and_then(|e| e.urls.into_iter().find_map(|u| u.expanded_url));
                TimelinePost {
                    url: Some(self.status_url(&tweet.id)),
                    created_at: tweet.created_at.unwrap_or_else(Utc::now),
                    link,
                    application: None,
                    id: tweet.id,
                }
            })
            .collect())
    }

    fn name(&self) -> &str {
        "twitter"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(CHARACTER_LIMIT)
    }

    fn max_attachments(&self) -> usize {
        4
    }
}

fn map_status(status: u16, context: &str, message: &str) -> PlatformError {
    match status {
        401 | 403 => PlatformError::Authentication(format!(
            "Twitter authentication failed ({}): HTTP {} {}",
            context, status, message
        )),
        400 | 422 => PlatformError::Validation(format!(
            "Twitter rejected the request ({}): HTTP {} {}",
            context, status, message
        )),
        429 => PlatformError::RateLimit(format!(
            "Twitter rate limit exceeded ({}): {}",
            context, message
        )),
        500..=599 => PlatformError::Network(format!(
            "Twitter server error ({}): HTTP {} {}",
            context, status, message
        )),
        _ => PlatformError::Posting(format!(
            "Twitter HTTP error ({}): HTTP {} {}",
            context, status, message
        )),
    }
}
