//! Feed fetching and file downloads
//!
//! [`FeedSource`] is the seam between the run and the web: it fetches feed
//! documents and downloads attachment files. [`HttpFeedSource`] does it
//! over HTTP; [`mock::MockFeedSource`] serves canned answers to tests.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::HttpConfig;
use crate::error::{ConfigError, FeedError, Result};
use crate::types::Feed;

pub mod mock;

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse the feed document at `url`
    async fn fetch_feed(&self, url: &str) -> std::result::Result<Feed, FeedError>;

    /// Download `url` into the file at `dest`, returning the size in bytes
    async fn download(&self, url: &str, dest: &Path) -> std::result::Result<u64, FeedError>;
}

/// [`FeedSource`] backed by a `reqwest` client
pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "http".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> std::result::Result<reqwest::Response, FeedError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FeedError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_feed(&self, url: &str) -> std::result::Result<Feed, FeedError> {
        info!("Fetching {} …", url);
        let body = self
            .get(url)
            .await?
            .text()
            .await
            .map_err(|e| FeedError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let feed = parse_feed(url, &body)?;
        debug!(url, items = feed.items.len(), "feed fetched");
        Ok(feed)
    }

    async fn download(&self, url: &str, dest: &Path) -> std::result::Result<u64, FeedError> {
        let download_error = |message: String| FeedError::Download {
            url: url.to_string(),
            message,
        };

        let mut response = self.get(url).await?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| download_error(format!("cannot create {}: {}", dest.display(), e)))?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_error(e.to_string()))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| download_error(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        debug!(url, bytes = written, dest = %dest.display(), "downloaded");
        Ok(written)
    }
}

/// Parse a JSON feed document
pub fn parse_feed(url: &str, body: &str) -> std::result::Result<Feed, FeedError> {
    serde_json::from_str(body).map_err(|e| FeedError::Parse {
        url: url.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Answer the first request on a local port with `response`, verbatim
    async fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(&response).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{}", addr)
    }

    fn http_response(status: &str, content_length: usize, body: &[u8]) -> Vec<u8> {
        let mut response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status, content_length
        )
        .into_bytes();
        response.extend_from_slice(body);
        response
    }

    fn source() -> HttpFeedSource {
        HttpFeedSource::new(&HttpConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_json_feed() {
        let body = r#"{
            "version": "https://jsonfeed.org/version/1.1",
            "title": "Links",
            "items": [
                {
                    "url": "https://example.com/links/2/",
                    "title": "Second",
                    "content_text": "Second link https://example.com/links/2/",
                    "date_published": "2024-01-10T10:00:00+01:00",
                    "lang": "fr",
                    "attachments": [
                        { "url": "https://example.com/2.jpg", "mime_type": "image/jpeg", "title": "A photo" }
                    ]
                },
                {
                    "url": "https://example.com/links/1/",
                    "title": "First",
                    "content_text": "First link",
                    "date_published": "2024-01-01T10:00:00+01:00",
                    "lang": "en"
                }
            ]
        }"#;

        let feed = parse_feed("https://example.com/feed.json", body).unwrap();
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[0].attachments.len(), 1);
        assert!(feed.items[1].attachments.is_empty());
    }

    #[test]
    fn test_parse_feed_without_items() {
        let feed = parse_feed("u", r#"{"title": "empty"}"#).unwrap();
        assert!(feed.items.is_empty());
    }

    #[test]
    fn test_parse_invalid_feed() {
        let err = parse_feed("https://example.com/feed.json", "<html>").unwrap_err();
        match err {
            FeedError::Parse { url, .. } => assert_eq!(url, "https://example.com/feed.json"),
            other => panic!("Expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_item_without_url_is_invalid() {
        let result = parse_feed("u", r#"{"items": [{"title": "no url"}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_http_source_builds_from_config() {
        assert!(HttpFeedSource::new(&HttpConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_feed_over_http() {
        let body = br#"{"items":[{"url":"https://example.com/links/1/","title":"One"}]}"#;
        let base = serve_once(http_response("200 OK", body.len(), body)).await;

        let feed = source().fetch_feed(&format!("{}/feed.json", base)).await.unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title, "One");
    }

    #[tokio::test]
    async fn test_fetch_feed_error_status() {
        let base = serve_once(http_response("404 Not Found", 9, b"not found")).await;
        let url = format!("{}/feed.json", base);

        match source().fetch_feed(&url).await {
            Err(FeedError::Status { url: failed, status }) => {
                assert_eq!(failed, url);
                assert_eq!(status, 404);
            }
            other => panic!("Expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_feed_with_html_body_is_a_parse_error() {
        let base = serve_once(http_response("200 OK", 6, b"<html>")).await;

        let result = source().fetch_feed(&format!("{}/feed.json", base)).await;
        assert!(matches!(result, Err(FeedError::Parse { .. })));
    }

    #[tokio::test]
    async fn test_download_writes_every_byte() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("image-1");
        let body: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let base = serve_once(http_response("200 OK", body.len(), &body)).await;

        let written = source()
            .download(&format!("{}/photo.jpg", base), &dest)
            .await
            .unwrap();
        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&dest).unwrap(), body);
    }

    #[tokio::test]
    async fn test_truncated_download_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("image-2");
        // Announces more bytes than it sends, then closes
        let base = serve_once(http_response("200 OK", 1000, b"only a few bytes")).await;

        let result = source().download(&format!("{}/photo.jpg", base), &dest).await;
        assert!(matches!(result, Err(FeedError::Download { .. })), "{result:?}");
    }

    #[tokio::test]
    async fn test_download_error_status() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve_once(http_response("500 Internal Server Error", 0, b"")).await;

        let result = source()
            .download(&format!("{}/photo.jpg", base), &dir.path().join("image-3"))
            .await;
        assert!(matches!(result, Err(FeedError::Status { status: 500, .. })));
    }
}
