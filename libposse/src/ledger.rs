//! Syndication ledger and run timestamp documents
//!
//! The ledger maps an item's canonical URL to everything that was ever
//! published for it. Both documents are read once when a run starts and
//! written back once, as a whole, when the run changed them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::LedgerError;
use crate::types::FeedItem;

/// Syndication record of one feed item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub item: FeedItem,

    /// URLs of every status published for this item, oldest first
    #[serde(default)]
    pub toots: Vec<String>,
}

impl LedgerEntry {
    pub fn new(item: FeedItem) -> Self {
        Self {
            item,
            toots: Vec::new(),
        }
    }

    pub fn times_posted(&self) -> usize {
        self.toots.len()
    }
}

/// On-disk shape of a ledger value. Older caches stored only the URL of
/// the single status published for an item, and some entries lack their
/// own `url` field; the map key stands in for it.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Entry(Map<String, Value>),
    Legacy(String),
}

impl StoredEntry {
    fn into_entry(self, url: &str) -> Result<LedgerEntry, serde_json::Error> {
        match self {
            StoredEntry::Entry(mut fields) => {
                let missing = fields
                    .get("url")
                    .and_then(Value::as_str)
                    .map_or(true, str::is_empty);
                if missing {
                    fields.insert("url".to_string(), Value::String(url.to_string()));
                }
                serde_json::from_value(Value::Object(fields))
            }
            StoredEntry::Legacy(toot) => Ok(LedgerEntry {
                item: FeedItem::new(url),
                toots: vec![toot],
            }),
        }
    }
}

/// Mapping from canonical item URL to its syndication record
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    entries: BTreeMap<String, LedgerEntry>,
    dirty: bool,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a ledger document; a missing file is an empty ledger
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let Some(content) = read_optional(path)? else {
            debug!(path = %path.display(), "no ledger yet, starting empty");
            return Ok(Self::new());
        };

        Self::from_json(&content).map_err(|source| LedgerError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a ledger document
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let stored: BTreeMap<String, StoredEntry> = serde_json::from_str(content)?;

        let entries = stored
            .into_iter()
            .map(|(url, stored)| {
                let entry = stored.into_entry(&url)?;
                Ok((url, entry))
            })
            .collect::<Result<BTreeMap<_, _>, serde_json::Error>>()?;

        Ok(Self {
            entries,
            dirty: false,
        })
    }

    /// Serialize the whole ledger, pretty-printed
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries)
    }

    /// Write the ledger back if this run changed it
    ///
    /// Returns whether a write happened. The document is replaced as a
    /// whole through a sibling temporary file.
    pub fn persist(&mut self, path: &Path) -> Result<bool, LedgerError> {
        if !self.dirty {
            debug!(path = %path.display(), "ledger unchanged, not writing");
            return Ok(false);
        }

        let content = self.to_json()?;
        write_replacing(path, &content)?;
        self.dirty = false;
        debug!(path = %path.display(), entries = self.entries.len(), "ledger written");
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<&LedgerEntry> {
        self.entries.get(url)
    }

    /// Entries in URL order
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    /// Merge a freshly fetched item
    ///
    /// A known URL keeps its `toots` and has its other fields refreshed; a
    /// new URL gets an empty history. Returns whether the ledger changed.
    pub fn merge(&mut self, item: FeedItem) -> bool {
        match self.entries.get_mut(&item.url) {
            Some(entry) if entry.item == item => false,
            Some(entry) => {
                entry.item = item;
                self.dirty = true;
                true
            }
            None => {
                self.entries
                    .insert(item.url.clone(), LedgerEntry::new(item));
                self.dirty = true;
                true
            }
        }
    }

    /// Append a published status to the item's history
    pub fn record_publish(&mut self, item: &FeedItem, toot_url: impl Into<String>) {
        self.entries
            .entry(item.url.clone())
            .or_insert_with(|| LedgerEntry::new(item.clone()))
            .toots
            .push(toot_url.into());
        self.dirty = true;
    }

    /// Smallest history length over the whole ledger
    pub fn min_times_posted(&self) -> Option<usize> {
        self.entries.values().map(LedgerEntry::times_posted).min()
    }

    /// Every entry whose history length equals the ledger-wide minimum
    pub fn least_syndicated(&self) -> Vec<&LedgerEntry> {
        let Some(min) = self.min_times_posted() else {
            return Vec::new();
        };
        self.entries
            .values()
            .filter(|entry| entry.times_posted() == min)
            .collect()
    }
}

/// Time of the last successful publish, in epoch milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTimestamp {
    pub timestamp: i64,

    #[serde(skip)]
    dirty: bool,
}

impl RunTimestamp {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            dirty: false,
        }
    }

    /// Load the companion document; a missing file means "never published"
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let Some(content) = read_optional(path)? else {
            return Ok(Self::default());
        };

        serde_json::from_str(&content).map_err(|source| LedgerError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Whether a run at `now` comes less than `min_interval` after the last publish
    pub fn is_too_soon(&self, now: DateTime<Utc>, min_interval: Duration) -> bool {
        let interval_ms = i64::try_from(min_interval.as_millis()).unwrap_or(i64::MAX);
        now.timestamp_millis() < self.timestamp.saturating_add(interval_ms)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.timestamp = now.timestamp_millis();
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn persist(&mut self, path: &Path) -> Result<bool, LedgerError> {
        if !self.dirty {
            return Ok(false);
        }

        let content = serde_json::to_string_pretty(self)?;
        write_replacing(path, &content)?;
        self.dirty = false;
        Ok(true)
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, LedgerError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LedgerError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_replacing(path: &Path, content: &str) -> Result<(), LedgerError> {
    let write_error = |source| LedgerError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }

    let tmp = temporary_sibling(path);
    std::fs::write(&tmp, content).map_err(write_error)?;
    std::fs::rename(&tmp, path).map_err(write_error)
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn item(url: &str, title: &str) -> FeedItem {
        let mut item = FeedItem::new(url);
        item.title = title.to_string();
        item
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::load(&dir.path().join("missing.json")).unwrap();
        assert!(ledger.is_empty());
        assert!(!ledger.is_dirty());
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = Ledger::load(&path);
        assert!(matches!(result, Err(LedgerError::Parse { .. })));
    }

    #[test]
    fn test_legacy_string_values_load_as_history() {
        let ledger = Ledger::from_json(
            r#"{ "https://example.com/links/1/": "https://mamot.fr/@me/1" }"#,
        )
        .unwrap();

        let entry = ledger.get("https://example.com/links/1/").unwrap();
        assert_eq!(entry.item.url, "https://example.com/links/1/");
        assert_eq!(entry.toots, vec!["https://mamot.fr/@me/1".to_string()]);
    }

    #[test]
    fn test_entry_document_shape() {
        let ledger = Ledger::from_json(
            r#"{
              "https://example.com/photos/1/": {
                "url": "https://example.com/photos/1/",
                "title": "Sunset",
                "content_text": "Sunset over the sea",
                "date_published": "2023-06-01",
                "lang": "en",
                "toots": ["https://mamot.fr/@me/10", "https://mamot.fr/@me/20"]
              }
            }"#,
        )
        .unwrap();

        let entry = ledger.get("https://example.com/photos/1/").unwrap();
        assert_eq!(entry.item.title, "Sunset");
        assert_eq!(entry.times_posted(), 2);
        assert!(entry.item.extra.is_empty(), "toots must not leak into extra");
    }

    #[test]
    fn test_entry_without_url_takes_the_key() {
        let ledger = Ledger::from_json(
            r#"{
              "https://example.com/p/": { "title": "T", "toots": ["x"] },
              "https://example.com/q/": { "url": "", "toots": [] }
            }"#,
        )
        .unwrap();

        let entry = ledger.get("https://example.com/p/").unwrap();
        assert_eq!(entry.item.url, "https://example.com/p/");
        assert_eq!(entry.item.title, "T");
        assert_eq!(entry.toots, vec!["x".to_string()]);
        assert!(entry.item.extra.is_empty());

        let empty = ledger.get("https://example.com/q/").unwrap();
        assert_eq!(empty.item.url, "https://example.com/q/");
    }

    #[test]
    fn test_unknown_attachment_fields_survive_a_write() {
        let mut ledger = Ledger::from_json(
            r#"{
              "https://example.com/photos/1/": {
                "url": "https://example.com/photos/1/",
                "attachments": [
                  {
                    "url": "https://example.com/1.jpg",
                    "mime_type": "image/jpeg",
                    "title": "t",
                    "size_in_bytes": 1234
                  }
                ],
                "toots": []
              }
            }"#,
        )
        .unwrap();
        let item = ledger.get("https://example.com/photos/1/").unwrap().item.clone();
        ledger.record_publish(&item, "https://mamot.fr/@me/1");

        let written: Value = serde_json::from_str(&ledger.to_json().unwrap()).unwrap();
        let attachment = &written["https://example.com/photos/1/"]["attachments"][0];
        assert_eq!(attachment["size_in_bytes"], 1234);
        assert_eq!(attachment["mime_type"], "image/jpeg");
    }

    #[test]
    fn test_merge_preserves_history() {
        let mut ledger = Ledger::new();
        let original = item("https://example.com/p/1/", "Old title");
        ledger.record_publish(&original, "https://mamot.fr/@me/1");
        ledger.record_publish(&original, "https://mamot.fr/@me/2");

        let changed = ledger.merge(item("https://example.com/p/1/", "New title"));
        assert!(changed);

        let entry = ledger.get("https://example.com/p/1/").unwrap();
        assert_eq!(entry.item.title, "New title");
        assert_eq!(
            entry.toots,
            vec![
                "https://mamot.fr/@me/1".to_string(),
                "https://mamot.fr/@me/2".to_string()
            ]
        );
    }

    #[test]
    fn test_merge_identical_item_is_not_a_mutation() {
        let mut ledger =
            Ledger::from_json(r#"{ "u": { "url": "u", "title": "T", "toots": [] } }"#).unwrap();
        assert!(!ledger.merge(item("u", "T")));
        assert!(!ledger.is_dirty());

        assert!(ledger.merge(item("v", "V")));
        assert!(ledger.is_dirty());
        assert_eq!(ledger.get("v").unwrap().times_posted(), 0);
    }

    #[test]
    fn test_least_syndicated() {
        let mut ledger = Ledger::new();
        for url in ["a", "b", "c"] {
            ledger.merge(item(url, url));
        }
        ledger.record_publish(&item("a", "a"), "t1");

        let urls: Vec<&str> = ledger
            .least_syndicated()
            .into_iter()
            .map(|e| e.item.url.as_str())
            .collect();
        assert_eq!(urls, vec!["b", "c"]);
        assert_eq!(ledger.min_times_posted(), Some(0));
        assert!(Ledger::new().least_syndicated().is_empty());
    }

    #[test]
    fn test_persist_only_when_dirty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let original = r#"{"u":{"url":"u","toots":["x"]}}"#;
        std::fs::write(&path, original).unwrap();

        let mut ledger = Ledger::load(&path).unwrap();
        assert!(!ledger.persist(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);

        ledger.record_publish(&item("u", ""), "y");
        assert!(ledger.persist(&path).unwrap());
        assert!(!ledger.is_dirty());

        let reloaded = Ledger::load(&path).unwrap();
        assert_eq!(reloaded.get("u").unwrap().toots, vec!["x", "y"]);
        assert!(!dir.path().join("ledger.json.tmp").exists());
    }

    #[test]
    fn test_persist_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache").join("ledger.json");

        let mut ledger = Ledger::new();
        ledger.merge(item("u", "T"));
        assert!(ledger.persist(&path).unwrap());
        assert!(path.exists());
    }

    #[test]
    fn test_run_timestamp_throttle() {
        let last = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let stamp = RunTimestamp::new(last.timestamp_millis());
        let twenty_hours = Duration::from_secs(20 * 3600);

        let soon = Utc.with_ymd_and_hms(2024, 3, 2, 3, 59, 59).unwrap();
        assert!(stamp.is_too_soon(soon, twenty_hours));

        let later = Utc.with_ymd_and_hms(2024, 3, 2, 4, 0, 0).unwrap();
        assert!(!stamp.is_too_soon(later, twenty_hours));

        assert!(!RunTimestamp::default().is_too_soon(soon, twenty_hours));
    }

    #[test]
    fn test_run_timestamp_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("timestamp.json");

        let mut stamp = RunTimestamp::load(&path).unwrap();
        assert_eq!(stamp.timestamp, 0);
        assert!(!stamp.persist(&path).unwrap());
        assert!(!path.exists());

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        stamp.touch(now);
        assert!(stamp.persist(&path).unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(&now.timestamp_millis().to_string()));
        assert_eq!(
            RunTimestamp::load(&path).unwrap().timestamp,
            now.timestamp_millis()
        );
    }
}
