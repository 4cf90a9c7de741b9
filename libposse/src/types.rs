//! Core types for posse

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A feed document: the `items` of a JSON feed, newest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Feed {
    #[serde(default)]
    pub items: Vec<FeedItem>,
}

/// One candidate post sourced from a feed
///
/// `url` is the canonical identity of the item. Fields the feed sends that
/// are not modelled here are kept in `extra` so a ledger snapshot stores
/// the item exactly as it was received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub url: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub content_text: String,

    #[serde(default)]
    pub date_published: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<FeedAttachment>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeedItem {
    /// Create an item with only its identity set
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            content_text: String::new(),
            date_published: String::new(),
            lang: None,
            attachments: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Parsed `date_published`, or `None` when the feed sent something unreadable
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.date_published)
    }

    /// Attachments whose MIME type is an image, in feed order
    pub fn image_attachments(&self) -> impl Iterator<Item = &FeedAttachment> {
        self.attachments.iter().filter(|a| a.is_image())
    }
}

/// A file attached to a feed item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedAttachment {
    pub url: String,

    #[serde(default)]
    pub mime_type: String,

    /// Used as the media description (alt text) on upload
    #[serde(default)]
    pub title: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeedAttachment {
    pub fn new(
        url: impl Into<String>,
        mime_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
            title: title.into(),
            extra: Map::new(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
    }
}

/// Parse a feed timestamp
///
/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.fff]` (UTC) and a bare
/// `YYYY-MM-DD` (UTC midnight).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Visibility of a created status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
    Direct,
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "unlisted" => Ok(Visibility::Unlisted),
            "private" => Ok(Visibility::Private),
            "direct" => Ok(Visibility::Direct),
            _ => Err(format!(
                "Invalid visibility: '{}'. Valid options: public, unlisted, private, direct",
                s
            )),
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Visibility::Public => write!(f, "public"),
            Visibility::Unlisted => write!(f, "unlisted"),
            Visibility::Private => write!(f, "private"),
            Visibility::Direct => write!(f, "direct"),
        }
    }
}

/// A status about to be created on a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub text: String,
    pub media_ids: Vec<String>,
    pub visibility: Visibility,
    pub language: Option<String>,
}

impl NewPost {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            media_ids: Vec::new(),
            visibility: Visibility::Public,
            language: None,
        }
    }
}

/// A status the network accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub id: String,
    /// Public URL of the status (falls back to its URI)
    pub url: String,
}

/// A status read back from the account's timeline or a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelinePost {
    pub id: String,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    /// URL of the link card attached to the status, if any
    pub link: Option<String>,
    /// Name of the client application that created the status
    pub application: Option<String>,
}

/// One page of an account timeline, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelinePage {
    pub posts: Vec<TimelinePost>,
    /// Cursor for the next (older) page; `None` when the timeline ends
    pub next_cursor: Option<String>,
}
